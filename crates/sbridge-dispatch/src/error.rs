use sbridge_partition::PartitionError;
use sbridge_provider::ProviderError;
use sbridge_sched::SchedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown node name(s): {}", names.join(","))]
    UnknownNodes { names: Vec<String> },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Sched(#[from] SchedError),

    #[error(transparent)]
    Partition(#[from] PartitionError),
}
