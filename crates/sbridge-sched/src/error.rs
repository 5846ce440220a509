use sbridge_core::{ExecError, Retryable};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("could not parse scheduler output: {0}")]
    Parse(String),
}

impl Retryable for SchedError {
    fn is_transient(&self) -> bool {
        match self {
            SchedError::Unavailable(_) => true,
            SchedError::Exec(e) => e.is_transient(),
            SchedError::Parse(_) => false,
        }
    }
}
