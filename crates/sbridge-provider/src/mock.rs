//! In-memory fleet double with the mutation helpers the tests drive:
//! add nodes, flip states, assign addresses, and drop nodes from the
//! inventory to simulate termination.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sbridge_domain::{NodeState, ProviderNode, SoftwareConfig, TargetState};
use serde_json::{Map, Value};

use crate::client::{FleetClient, NameHook};
use crate::error::ProviderError;
use crate::types::{AllocateSpec, AllocationResult, BootupResult, Bucket};

/// What a booted node does next, so tests can drive the wait loop to a
/// terminal classification without concurrent mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootBehavior {
    /// Stay in `Acquiring` until a test mutates the node.
    #[default]
    Stall,
    /// Jump straight to `Ready` with an IP and a matching hostname.
    BecomeReady,
    /// Jump straight to `Failed`.
    BecomeFailed,
    /// Drop out of the inventory entirely, as a reclaimed VM does.
    Vanish,
}

#[derive(Default)]
struct FleetState {
    buckets: Vec<Bucket>,
    nodes: Vec<ProviderNode>,
    operations: HashMap<String, Vec<String>>,
    op_counter: usize,
    ip_counter: u8,
    calls: Vec<String>,
    boot_behavior: BootBehavior,
}

#[derive(Default)]
pub struct MockFleet {
    state: Mutex<FleetState>,
}

impl MockFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bucket(&self, bucket: Bucket) {
        self.state.lock().unwrap().buckets.push(bucket);
    }

    /// Add a node in `Off` state with an empty configuration bag.
    pub fn add_node(&self, name: &str, nodearray: &str) {
        self.add_node_with_config(name, nodearray, Map::new());
    }

    pub fn add_node_with_config(&self, name: &str, nodearray: &str, config: Map<String, Value>) {
        let node = ProviderNode {
            name: name.to_string(),
            node_array: nodearray.to_string(),
            vm_size: "Standard_F4".to_string(),
            placement_group: None,
            private_ip: None,
            hostname: None,
            state: NodeState::Off,
            target_state: TargetState::Started,
            keep_alive: false,
            software_configuration: SoftwareConfig(config),
        };
        self.state.lock().unwrap().nodes.push(node);
    }

    pub fn update_state(&self, state: NodeState, names: &[&str]) {
        let mut guard = self.state.lock().unwrap();
        for node in guard.nodes.iter_mut() {
            if names.contains(&node.name.as_str()) {
                node.state = state;
            }
        }
    }

    /// Assign sequential private IPs, as a booting fleet would.
    pub fn assign_ip(&self, names: &[&str]) {
        let mut guard = self.state.lock().unwrap();
        for i in 0..guard.nodes.len() {
            if names.contains(&guard.nodes[i].name.as_str())
                && guard.nodes[i].private_ip.is_none()
            {
                guard.ip_counter += 1;
                guard.nodes[i].private_ip = Some(format!("10.1.0.{}", guard.ip_counter));
            }
        }
    }

    pub fn set_hostname(&self, name: &str, hostname: &str) {
        let mut guard = self.state.lock().unwrap();
        if let Some(node) = guard.nodes.iter_mut().find(|n| n.name == name) {
            node.hostname = Some(hostname.to_string());
        }
    }

    pub fn set_keep_alive(&self, name: &str, keep_alive: bool) {
        let mut guard = self.state.lock().unwrap();
        if let Some(node) = guard.nodes.iter_mut().find(|n| n.name == name) {
            node.keep_alive = keep_alive;
        }
    }

    /// Remove nodes from the inventory entirely, as termination does.
    pub fn remove_nodes(&self, names: &[&str]) {
        let mut guard = self.state.lock().unwrap();
        guard.nodes.retain(|n| !names.contains(&n.name.as_str()));
    }

    pub fn node(&self, name: &str) -> Option<ProviderNode> {
        self.state.lock().unwrap().nodes.iter().find(|n| n.name == name).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn set_boot_behavior(&self, behavior: BootBehavior) {
        self.state.lock().unwrap().boot_behavior = behavior;
    }
}

#[async_trait]
impl FleetClient for MockFleet {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, ProviderError> {
        Ok(self.state.lock().unwrap().buckets.clone())
    }

    async fn list_nodes(&self) -> Result<Vec<ProviderNode>, ProviderError> {
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn allocate(
        &self,
        spec: &AllocateSpec,
        name_hook: &NameHook<'_>,
    ) -> Result<AllocationResult, ProviderError> {
        let bucket = {
            let guard = self.state.lock().unwrap();
            guard
                .buckets
                .iter()
                .find(|b| b.bucket_id == spec.bucket_id)
                .cloned()
                .ok_or_else(|| ProviderError::Api {
                    status: 404,
                    detail: format!("no such bucket: {}", spec.bucket_id),
                })?
        };

        let mut allocated = Vec::new();
        for index in 1..=spec.count {
            let name = name_hook(&bucket, index)?;
            let mut guard = self.state.lock().unwrap();
            guard.calls.push(format!("allocate {} {}", spec.bucket_id, name));
            if let Some(existing) = guard.nodes.iter().find(|n| n.name == name) {
                if !existing.state.is_resumable() {
                    return Err(ProviderError::Api {
                        status: 409,
                        detail: format!("node {} already exists in state {}", name, existing.state),
                    });
                }
                allocated.push(existing.clone());
                continue;
            }
            let node = ProviderNode {
                name: name.clone(),
                node_array: bucket.nodearray.clone(),
                vm_size: bucket.vm_size.clone(),
                placement_group: bucket.placement_group.clone(),
                private_ip: None,
                hostname: None,
                state: NodeState::Off,
                target_state: TargetState::Started,
                keep_alive: false,
                software_configuration: bucket.software_configuration.clone(),
            };
            guard.nodes.push(node.clone());
            allocated.push(node);
        }
        Ok(AllocationResult { nodes: allocated })
    }

    async fn bootup(&self, names: &[String]) -> Result<BootupResult, ProviderError> {
        let mut guard = self.state.lock().unwrap();
        guard.op_counter += 1;
        let operation_id = format!("op-{}", guard.op_counter);
        guard.operations.insert(operation_id.clone(), names.to_vec());
        guard.calls.push(format!("bootup {}", names.join(",")));
        let behavior = guard.boot_behavior;
        if behavior == BootBehavior::Vanish {
            guard.nodes.retain(|n| !names.contains(&n.name));
            return Ok(BootupResult { operation_id });
        }
        let mut ip_counter = guard.ip_counter;
        for node in guard.nodes.iter_mut() {
            if names.contains(&node.name) {
                node.target_state = TargetState::Started;
                match behavior {
                    BootBehavior::BecomeFailed => node.state = NodeState::Failed,
                    BootBehavior::BecomeReady => {
                        node.state = NodeState::Ready;
                        ip_counter += 1;
                        node.private_ip = Some(format!("10.1.0.{}", ip_counter));
                        node.hostname = Some(node.name.clone());
                    }
                    _ => node.state = NodeState::Acquiring,
                }
            }
        }
        guard.ip_counter = ip_counter;
        Ok(BootupResult { operation_id })
    }

    async fn shutdown(&self, names: &[String]) -> Result<(), ProviderError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(format!("shutdown {}", names.join(",")));
        for node in guard.nodes.iter_mut() {
            if names.contains(&node.name) {
                node.state = NodeState::Terminating;
                node.target_state = TargetState::Deallocated;
            }
        }
        Ok(())
    }

    async fn terminate(&self, names: &[String]) -> Result<(), ProviderError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(format!("terminate {}", names.join(",")));
        guard.nodes.retain(|n| !names.contains(&n.name));
        Ok(())
    }

    async fn deallocate(&self, names: &[String]) -> Result<(), ProviderError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(format!("deallocate {}", names.join(",")));
        for node in guard.nodes.iter_mut() {
            if names.contains(&node.name) {
                node.state = NodeState::Deallocated;
            }
        }
        Ok(())
    }

    async fn get_nodes(
        &self,
        operation_id: Option<&str>,
        _request_id: Option<&str>,
    ) -> Result<Vec<ProviderNode>, ProviderError> {
        let guard = self.state.lock().unwrap();
        match operation_id {
            Some(op) => {
                let names = guard.operations.get(op).cloned().unwrap_or_default();
                Ok(guard
                    .nodes
                    .iter()
                    .filter(|n| names.contains(&n.name))
                    .cloned()
                    .collect())
            }
            None => Ok(guard.nodes.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(id: &str, nodearray: &str) -> Bucket {
        Bucket {
            bucket_id: id.to_string(),
            nodearray: nodearray.to_string(),
            vm_size: "Standard_F4".to_string(),
            placement_group: None,
            max_count: 8,
            max_placement_group_size: 0,
            available_count: 8,
            software_configuration: SoftwareConfig::default(),
        }
    }

    #[tokio::test]
    async fn allocate_invokes_hook_once_per_node() {
        let fleet = MockFleet::new();
        fleet.add_bucket(bucket("b1", "htc"));

        let spec = AllocateSpec {
            bucket_id: "b1".into(),
            count: 1,
            exclusive: true,
            colocated: false,
        };
        let hook = |_: &Bucket, index: u32| {
            if index != 1 {
                return Err(ProviderError::NameHook(format!("unexpected index {}", index)));
            }
            Ok("htc-1".to_string())
        };
        let result = fleet.allocate(&spec, &hook).await.unwrap();
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].name, "htc-1");
        assert!(fleet.node("htc-1").is_some());
    }

    #[tokio::test]
    async fn allocate_rejects_names_in_non_resumable_states() {
        let fleet = MockFleet::new();
        fleet.add_bucket(bucket("b1", "htc"));
        fleet.add_node("htc-1", "htc");
        fleet.update_state(NodeState::Terminating, &["htc-1"]);

        let spec = AllocateSpec {
            bucket_id: "b1".into(),
            count: 1,
            exclusive: true,
            colocated: false,
        };
        let hook = |_: &Bucket, _: u32| Ok("htc-1".to_string());
        let err = fleet.allocate(&spec, &hook).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 409, .. }));
    }

    #[tokio::test]
    async fn bootup_registers_an_operation() {
        let fleet = MockFleet::new();
        fleet.add_node("htc-1", "htc");
        let result = fleet.bootup(&["htc-1".to_string()]).await.unwrap();
        let nodes = fleet.get_nodes(Some(&result.operation_id), None).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].state, NodeState::Acquiring);
    }
}
