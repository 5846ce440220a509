use sbridge_provider::ProviderError;
use sbridge_sched::SchedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Sched(#[from] SchedError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("another instance holds the lock file (pid {pid})")]
    LockHeld { pid: u32 },
}
