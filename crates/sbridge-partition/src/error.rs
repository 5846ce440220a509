use sbridge_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("no bucket owns node name {0}")]
    NoBucket(String),

    #[error("cannot add dynamic node {0} to static partition {1}")]
    NotDynamic(String, String),
}
