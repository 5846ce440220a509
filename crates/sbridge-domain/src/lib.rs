//! Shared data model: provider and scheduler node records, node state
//! enumerations, reason sentinels, and node-name ordering.

mod names;
mod types;

pub use names::{hpc_sort_key, htc_sort_key, sort_nodes, SortKey};
pub use types::{
    reasons, NodeState, ProviderNode, SchedulerNode, SoftwareConfig, StateFlag, StateFlags,
    TargetState,
};
