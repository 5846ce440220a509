use std::collections::HashMap;

use sbridge_domain::{reasons, SchedulerNode, StateFlags};
use sbridge_sched::SlurmClient;
use tracing::info;

use crate::error::ReconcileError;

/// Cached scheduler node table for one reconciliation pass. Mutations
/// go through scontrol and, on success, are mirrored into the cache so
/// later decisions in the same pass see them.
pub struct SlurmView {
    nodes: Vec<SchedulerNode>,
    index: HashMap<String, usize>,
}

impl SlurmView {
    pub async fn load(slurm: &SlurmClient) -> Result<Self, ReconcileError> {
        let nodes = slurm.show_nodes(None).await?;
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
        Ok(Self { nodes, index })
    }

    /// Node names in scheduler enumeration order.
    pub fn names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&SchedulerNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut SchedulerNode> {
        self.index.get(name).map(|&i| &mut self.nodes[i])
    }

    pub async fn unset_reason(&mut self, slurm: &SlurmClient, name: &str) -> bool {
        if slurm.try_update_node(name, &[("Reason", "(null)")]).await {
            if let Some(node) = self.get_mut(name) {
                node.reason.clear();
            }
            true
        } else {
            false
        }
    }

    /// The scheduler thinks the node is off but the provider has it
    /// running. Operator intervention required.
    pub async fn mark_zombie(&mut self, slurm: &SlurmClient, name: &str) -> bool {
        let updated = slurm
            .try_update_node(
                name,
                &[
                    ("NodeAddr", name),
                    ("NodeHostName", name),
                    ("State", "down"),
                    ("Reason", reasons::ZOMBIE_NODE),
                ],
            )
            .await;
        if updated {
            if let Some(node) = self.get_mut(name) {
                node.state = StateFlags::parse("down");
                node.reason = reasons::ZOMBIE_NODE.to_string();
                node.node_addr = Some(name.to_string());
                node.node_host_name = Some(name.to_string());
            }
        }
        updated
    }

    /// The scheduler thinks the node is up but the provider has no
    /// record of it.
    pub async fn mark_missing(&mut self, slurm: &SlurmClient, name: &str) -> bool {
        let updated = slurm
            .try_update_node(
                name,
                &[
                    ("NodeAddr", name),
                    ("NodeHostName", name),
                    ("State", "down"),
                    ("Reason", reasons::NO_NODE),
                ],
            )
            .await;
        if updated {
            if let Some(node) = self.get_mut(name) {
                node.state = StateFlags::parse("down");
                node.reason = reasons::NO_NODE.to_string();
                node.node_addr = Some(name.to_string());
                node.node_host_name = Some(name.to_string());
            }
        }
        updated
    }

    pub async fn mark_failed(&mut self, slurm: &SlurmClient, name: &str) -> bool {
        let updated = slurm
            .try_update_node(
                name,
                &[("State", "down"), ("Reason", reasons::NODE_FAILURE)],
            )
            .await;
        if updated {
            if let Some(node) = self.get_mut(name) {
                node.state = StateFlags::parse("down");
                node.reason = reasons::NODE_FAILURE.to_string();
            }
        }
        updated
    }

    /// Return a bridge-downed node to service with the given reason
    /// (empty clears it).
    pub async fn recover(&mut self, slurm: &SlurmClient, name: &str, reason: &str) -> bool {
        let reason_value = if reason.is_empty() { "(null)" } else { reason };
        let updated = slurm
            .try_update_node(name, &[("State", "idle"), ("Reason", reason_value)])
            .await;
        if updated {
            if let Some(node) = self.get_mut(name) {
                node.state = StateFlags::parse("idle");
                node.reason = reason.to_string();
            }
        }
        updated
    }

    pub async fn assign_addr(&mut self, slurm: &SlurmClient, name: &str, ip: &str) -> bool {
        if let Some(node) = self.get(name) {
            if node.node_addr() == ip {
                return false;
            }
        }
        info!(node = name, ip, "assigning node address");
        let updated = slurm
            .try_update_node(name, &[("NodeAddr", ip), ("NodeHostName", ip)])
            .await;
        if updated {
            if let Some(node) = self.get_mut(name) {
                node.node_addr = Some(ip.to_string());
                node.node_host_name = Some(ip.to_string());
            }
        }
        updated
    }
}
