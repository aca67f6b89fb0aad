//! SPF wire opcodes and the byte layouts the graph instance packs/unpacks.
//!
//! Values here are symbolic placeholders for the real SPF API header
//! constants (not available in this workspace) but the packing itself is
//! bit-exact manual little-endian layout, matching spec's requirement that
//! the wire format is a third-party contract rather than something this
//! crate is free to redesign.

mod opcode;
mod sub_graph_list;
mod wire_cfg;

pub use opcode::{ApmOpcode, DataOpcode};
pub use sub_graph_list::{Edge, SubGraphList};
pub use wire_cfg::{Param, ParamPayload, IN_BAND_THRESHOLD};

use gsl_types::SgId;
use thiserror::Error;

/// Instance id the APM module itself is addressed by, used whenever a
/// set/get-config packet carries more than one parameter.
pub const APM_MODULE_INSTANCE_ID: u32 = 0x0000_0001;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("buffer too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unrecognized opcode {0:#x}")]
    UnknownOpcode(u32),
}

pub type WireResult<T> = Result<T, WireError>;

pub(crate) fn require(buf: &[u8], need: usize) -> WireResult<()> {
    if buf.len() < need {
        Err(WireError::Truncated {
            need,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Convenience conversion used by every packer that writes an `SgId` as a
/// raw little-endian `u32`.
pub(crate) fn sg_id_bytes(id: SgId) -> [u8; 4] {
    id.0.to_le_bytes()
}

pub(crate) fn read_sg_id(buf: &[u8]) -> SgId {
    SgId(u32::from_le_bytes(buf.try_into().unwrap()))
}
