//! Fleet REST API client: list, allocate, boot, and reclaim provider
//! nodes. Stateless across calls; correlation is by node name or
//! operation id.

mod client;
mod error;
mod hostname;
pub mod mock;
mod rest;
mod types;

pub use client::{await_node_hostname, FleetClient, NameHook};
pub use error::ProviderError;
pub use hostname::HostnamePolicy;
pub use rest::RestFleet;
pub use types::{AllocateSpec, AllocationResult, BootupResult, Bucket};
