use thiserror::Error;

use gsl_transport::TransportError;

pub type GprResult<T> = Result<T, GprError>;

#[derive(Debug, Error)]
pub enum GprError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid port configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("command timed out waiting for a reply")]
    Timeout,

    #[error("reply token did not match the in-flight command")]
    UnexpectedReply,
}

impl GprError {
    pub fn codec(msg: impl Into<String>) -> Self {
        GprError::Codec(msg.into())
    }
}
