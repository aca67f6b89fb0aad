//! Shared data model: key vectors, subgraph/processor/tag identifiers, and
//! the graph instance state machine's states, used by every layer above the
//! transport and driver crates.

mod error;
mod ids;
mod kv;
mod state;

pub use error::{AResult, GslError};
pub use ids::{GraphId, ModuleInstanceId, ProcId, SgId, TagId};
pub use kv::{Key, KeyVector, Value};
pub use state::GraphState;

/// An edge between two subgraph output/input ports, as returned by
/// `get_subgraph_connections`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub src_sg: SgId,
    pub dst_sg: SgId,
}

/// Memory class a calibration payload is stored/retrieved under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemType {
    NonPersistent,
    Persistent,
    GlobalPersistent,
}

/// Properties of one subgraph as reported by the ACDB collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubgraphProps {
    pub sg_id: SgId,
    pub proc_id: ProcId,
    pub perf_mode: u32,
    pub direction: u32,
}

/// Raw container/module graph returned for a given GKV.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphData {
    pub sg_ids: Vec<SgId>,
}

/// A single global-persist calibration identifier/entry pairing, as returned
/// by `get_subgraph_glb_persist_ids`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlbPersistEntry {
    pub cal_id: u32,
    pub sg_id: SgId,
}

/// Driver-specific properties for a subgraph (e.g. the data port it exposes).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverProps {
    pub sg_id: Option<SgId>,
    pub media_fmt: Vec<u8>,
}
