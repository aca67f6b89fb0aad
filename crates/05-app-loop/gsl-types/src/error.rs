use thiserror::Error;

/// Error taxonomy shared across every GSL layer, per the abstract kinds in
/// the error-handling design: each variant maps onto one upstream AR status
/// family rather than a literal errno.
#[derive(Clone, Debug, Error)]
pub enum GslError {
    #[error("bad input: {0}")]
    BadInput(&'static str),

    #[error("not found")]
    NotFound,

    #[error("out of resource: {0}")]
    OutOfResource(&'static str),

    #[error("subsystem not ready: mask {ss_mask:#x}")]
    NotReady { ss_mask: u32 },

    #[error("wire failure: {0}")]
    WireFailure(String),

    #[error("subsystem restart")]
    Ssr,

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

pub type AResult<T> = Result<T, GslError>;
