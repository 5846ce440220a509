use sbridge_sched::SchedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error(transparent)]
    Sched(#[from] SchedError),

    #[error("partition {0} does not exist")]
    UnknownPartition(String),

    #[error("need at least 2 powered-on idle nodes to build a topology, found {available}")]
    NotEnoughHosts { available: usize },

    #[error("operating system {0} is not supported")]
    UnsupportedOs(String),

    #[error("fabric manager is not reachable: {0}")]
    SharpUnavailable(String),

    #[error("the ibstatus command is not available on {0}")]
    MissingIbstatus(String),

    #[error("{step} failed on {host}: {detail}")]
    StepFailed {
        step: String,
        host: String,
        detail: String,
    },

    #[error("no blocks or switches were discovered")]
    EmptyTopology,

    #[error("block size must be greater than 0")]
    InvalidBlockSize,

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
