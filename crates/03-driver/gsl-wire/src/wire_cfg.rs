use crate::APM_MODULE_INSTANCE_ID;
use gsl_types::ModuleInstanceId;

/// Payloads up to this size are packed contiguously with the command header
/// (in-band); larger payloads are packed out-of-band, referencing a shared
/// memory allocation instead.
pub const IN_BAND_THRESHOLD: usize = 256;

/// One parameter targeted by a `SET_CFG`/`GET_CFG` packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub module_instance_id: ModuleInstanceId,
    pub param_id: u32,
    pub data: Vec<u8>,
}

/// The packed body of a `SET_CFG`/`GET_CFG` command: either the parameter
/// bytes directly follow the header (in-band) or the header carries a
/// pointer/handle/size triple into shared memory (out-of-band).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamPayload {
    InBand { module_instance_id: u32, data: Vec<u8> },
    OutOfBand {
        module_instance_id: u32,
        spf_addr: u64,
        mmap_handle: u32,
        size: u32,
    },
}

impl ParamPayload {
    /// Addresses a single parameter to its own module-instance-id and
    /// chooses in/out-of-band packing by the threshold above.
    pub fn for_single(param: &Param) -> Self {
        Self::pack(param.module_instance_id.0, &param.data)
    }

    /// Addresses a multi-parameter set/get to the APM module itself, per
    /// the "single-target shortcut" rule: only a lone parameter gets its
    /// own module-instance-id.
    pub fn for_many(total_len: usize, concatenated: &[u8]) -> Self {
        debug_assert_eq!(total_len, concatenated.len());
        Self::pack(APM_MODULE_INSTANCE_ID, concatenated)
    }

    fn pack(module_instance_id: u32, data: &[u8]) -> Self {
        if data.len() <= IN_BAND_THRESHOLD {
            ParamPayload::InBand {
                module_instance_id,
                data: data.to_vec(),
            }
        } else {
            // The caller is responsible for having already mapped `data`
            // into shared memory; packing here only records the triple.
            ParamPayload::OutOfBand {
                module_instance_id,
                spf_addr: 0,
                mmap_handle: 0,
                size: data.len() as u32,
            }
        }
    }

    pub fn is_out_of_band(&self) -> bool {
        matches!(self, ParamPayload::OutOfBand { .. })
    }

    pub fn with_shmem(self, spf_addr: u64, mmap_handle: u32) -> Self {
        match self {
            ParamPayload::OutOfBand {
                module_instance_id,
                size,
                ..
            } => ParamPayload::OutOfBand {
                module_instance_id,
                spf_addr,
                mmap_handle,
                size,
            },
            in_band => in_band,
        }
    }

    /// Packs the `SET_CFG`/`GET_CFG` parameter header (module-instance-id,
    /// param-id, a one-byte in/out-of-band tag) followed by either the
    /// in-band bytes or the out-of-band pointer/handle/size triple.
    pub fn encode(&self, param_id: u32) -> Vec<u8> {
        match self {
            ParamPayload::InBand {
                module_instance_id,
                data,
            } => {
                let mut out = Vec::with_capacity(13 + data.len());
                out.extend_from_slice(&module_instance_id.to_le_bytes());
                out.extend_from_slice(&param_id.to_le_bytes());
                out.push(0);
                out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                out.extend_from_slice(data);
                out
            }
            ParamPayload::OutOfBand {
                module_instance_id,
                spf_addr,
                mmap_handle,
                size,
            } => {
                let mut out = Vec::with_capacity(25);
                out.extend_from_slice(&module_instance_id.to_le_bytes());
                out.extend_from_slice(&param_id.to_le_bytes());
                out.push(1);
                out.extend_from_slice(&spf_addr.to_le_bytes());
                out.extend_from_slice(&mmap_handle.to_le_bytes());
                out.extend_from_slice(&size.to_le_bytes());
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_at_threshold_stays_in_band() {
        let param = Param {
            module_instance_id: ModuleInstanceId(7),
            param_id: 1,
            data: vec![0u8; IN_BAND_THRESHOLD],
        };
        assert!(!ParamPayload::for_single(&param).is_out_of_band());
    }

    #[test]
    fn payload_over_threshold_goes_out_of_band() {
        let param = Param {
            module_instance_id: ModuleInstanceId(7),
            param_id: 1,
            data: vec![0u8; IN_BAND_THRESHOLD + 1],
        };
        assert!(ParamPayload::for_single(&param).is_out_of_band());
    }

    #[test]
    fn encode_in_band_carries_data_after_header() {
        let param = Param {
            module_instance_id: ModuleInstanceId(7),
            param_id: 42,
            data: vec![1, 2, 3],
        };
        let encoded = ParamPayload::for_single(&param).encode(param.param_id);
        assert_eq!(&encoded[0..4], &7u32.to_le_bytes());
        assert_eq!(&encoded[4..8], &42u32.to_le_bytes());
        assert_eq!(encoded[8], 0);
        assert_eq!(&encoded[13..], &[1, 2, 3]);
    }

    #[test]
    fn multi_parameter_addresses_apm_module() {
        let bytes = vec![0u8; 4];
        let payload = ParamPayload::for_many(bytes.len(), &bytes);
        match payload {
            ParamPayload::InBand {
                module_instance_id, ..
            } => assert_eq!(module_instance_id, APM_MODULE_INSTANCE_ID),
            _ => panic!("expected in-band"),
        }
    }
}
