use thiserror::Error;

use gsl_gpr::GprError;
use gsl_types::GslError;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Core(#[from] GslError),
    #[error(transparent)]
    Transport(#[from] GprError),
    #[error("operation not permitted in state {0:?}")]
    WrongState(gsl_types::GraphState),
    #[error("subsystem restart in progress")]
    Ssr,
}

pub type GraphResult<T> = Result<T, GraphError>;
