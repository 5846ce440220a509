use std::time::Duration;

use async_trait::async_trait;
use sbridge_core::Clock;
use sbridge_domain::ProviderNode;
use tracing::debug;

use crate::error::ProviderError;
use crate::hostname::HostnamePolicy;
use crate::types::{AllocateSpec, AllocationResult, BootupResult, Bucket};

/// Called with `(bucket, 1-based index)` for every node an allocation
/// produces; must return the exact node name. Hooks fail on any index
/// other than 1 so a name is claimed exactly once.
pub type NameHook<'a> = dyn Fn(&Bucket, u32) -> Result<String, ProviderError> + Send + Sync + 'a;

const HOSTNAME_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Fleet API surface. Production uses [`crate::RestFleet`]; tests use
/// [`crate::mock::MockFleet`].
#[async_trait]
pub trait FleetClient: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, ProviderError>;

    async fn list_nodes(&self) -> Result<Vec<ProviderNode>, ProviderError>;

    async fn allocate(
        &self,
        spec: &AllocateSpec,
        name_hook: &NameHook<'_>,
    ) -> Result<AllocationResult, ProviderError>;

    async fn bootup(&self, names: &[String]) -> Result<BootupResult, ProviderError>;

    async fn shutdown(&self, names: &[String]) -> Result<(), ProviderError>;

    async fn terminate(&self, names: &[String]) -> Result<(), ProviderError>;

    async fn deallocate(&self, names: &[String]) -> Result<(), ProviderError>;

    /// Filtered node view used to poll a bootup.
    async fn get_nodes(
        &self,
        operation_id: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Vec<ProviderNode>, ProviderError>;
}

/// Block until the provider reports an acceptable hostname for `name`,
/// polling every few seconds up to `timeout`.
pub async fn await_node_hostname(
    fleet: &dyn FleetClient,
    clock: &dyn Clock,
    policy: &HostnamePolicy,
    name: &str,
    timeout: Duration,
) -> Result<String, ProviderError> {
    let deadline = clock.now() + chrono::TimeDelta::from_std(timeout).unwrap_or_default();
    loop {
        let nodes = fleet.list_nodes().await?;
        if let Some(node) = nodes.iter().find(|n| n.name == name) {
            if let Some(hostname) = &node.hostname {
                if policy.accepts(node) {
                    return Ok(hostname.clone());
                }
                debug!(node = name, hostname = %hostname, "hostname not yet acceptable");
            }
        }
        if clock.now() >= deadline {
            return Err(ProviderError::HostnameTimeout { name: name.to_string(), timeout });
        }
        clock.sleep(HOSTNAME_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sbridge_core::ManualClock;

    use super::*;
    use crate::mock::MockFleet;

    #[tokio::test]
    async fn await_hostname_times_out_when_never_assigned() {
        let fleet = MockFleet::new();
        fleet.add_node("htc-1", "htc");
        let clock = Arc::new(ManualClock::default());
        let policy = HostnamePolicy::from_patterns(&[]).unwrap();

        let err = await_node_hostname(
            &fleet,
            clock.as_ref(),
            &policy,
            "htc-1",
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::HostnameTimeout { .. }));
    }

    #[tokio::test]
    async fn await_hostname_returns_once_pattern_matches() {
        let fleet = MockFleet::new();
        fleet.add_node("htc-1", "htc");
        fleet.set_hostname("htc-1", "htc-1");
        let clock = Arc::new(ManualClock::default());
        let policy = HostnamePolicy::from_patterns(&[]).unwrap();

        let hostname = await_node_hostname(
            &fleet,
            clock.as_ref(),
            &policy,
            "htc-1",
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        assert_eq!(hostname, "htc-1");
    }
}
