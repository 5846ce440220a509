use sbridge_domain::{ProviderNode, SoftwareConfig};
use serde::{Deserialize, Serialize};

/// A (node array, VM size, placement group) capacity bucket as the
/// provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub bucket_id: String,
    pub nodearray: String,
    pub vm_size: String,
    #[serde(default)]
    pub placement_group: Option<String>,
    pub max_count: u32,
    #[serde(default)]
    pub max_placement_group_size: u32,
    #[serde(default)]
    pub available_count: u32,
    #[serde(default)]
    pub software_configuration: SoftwareConfig,
}

/// Constraints for one allocation call.
#[derive(Debug, Clone, Serialize)]
pub struct AllocateSpec {
    pub bucket_id: String,
    pub count: u32,
    pub exclusive: bool,
    /// Require same-placement-group co-location (HPC partitions).
    pub colocated: bool,
}

#[derive(Debug, Clone)]
pub struct AllocationResult {
    pub nodes: Vec<ProviderNode>,
}

#[derive(Debug, Clone)]
pub struct BootupResult {
    pub operation_id: String,
}
