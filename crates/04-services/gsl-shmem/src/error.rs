use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum ShmemError {
    #[error("shared-memory allocator out of memory")]
    OutOfMemory,
    #[error("subsystem mask {ss_mask:#x} not ready")]
    NotReady { ss_mask: u32 },
    #[error("unexpected reply from spf")]
    UnexpectedReply,
    #[error("spf mem-map command failed with status {status}")]
    WireFailure { status: i32 },
}

pub type ShmemResult<T> = Result<T, ShmemError>;
