use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use sbridge_domain::{reasons, NodeState, ProviderNode};
use sbridge_provider::FleetClient;
use sbridge_sched::SlurmClient;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::ReconcileError;
use crate::keepalive::KeepAliveFile;
use crate::view::SlurmView;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PassSummary {
    /// Provider state tally across the joined fleet.
    pub state_counts: BTreeMap<String, usize>,
    /// Names whose provider record was `Ready` this pass.
    pub ready: Vec<String>,
}

/// Joins the scheduler node table with the provider inventory once per
/// pass and issues the minimum corrective updates. Holds both sides of
/// the join; neither side references the other.
pub struct Reconciler {
    slurm: Arc<SlurmClient>,
    fleet: Arc<dyn FleetClient>,
    keep_alive: KeepAliveFile,
    /// Scheduler's current SuspendExcNodes membership.
    suspend_exc: HashSet<String>,
    /// Names whose keep-alive flag this process has seen set, i.e. the
    /// evidence that an entry is ours to remove.
    active_keep_alive: HashSet<String>,
    /// (name, ip) pairs already pointed at the scheduler.
    assigned_addrs: HashSet<(String, String)>,
}

impl Reconciler {
    pub fn new(
        slurm: Arc<SlurmClient>,
        fleet: Arc<dyn FleetClient>,
        keep_alive: KeepAliveFile,
    ) -> Self {
        Self {
            slurm,
            fleet,
            keep_alive,
            suspend_exc: HashSet::new(),
            active_keep_alive: HashSet::new(),
            assigned_addrs: HashSet::new(),
        }
    }

    pub async fn run_once(&mut self) -> Result<PassSummary, ReconcileError> {
        let cc_nodes = self.fleet.list_nodes().await?;
        let cc_by_name: HashMap<String, ProviderNode> =
            cc_nodes.iter().map(|n| (n.name.clone(), n.clone())).collect();
        let mut view = SlurmView::load(&self.slurm).await?;

        let mut unexpected: Vec<&str> = cc_by_name
            .keys()
            .filter(|name| !view.contains(name))
            .map(String::as_str)
            .collect();
        if !unexpected.is_empty() {
            unexpected.sort_unstable();
            warn!(
                nodes = %unexpected.join(","),
                "nodes found in the provider but not the scheduler - will these join as dynamic nodes?"
            );
        }

        self.suspend_exc = self.keep_alive.refresh(&self.slurm).await?;
        self.log_convergence(&cc_nodes);

        let mut summary = PassSummary::default();
        let mut ready_nodes: Vec<ProviderNode> = Vec::new();

        for name in view.names() {
            let Some(node) = view.get(&name).cloned() else {
                continue;
            };

            // A node that finished powering down can drop its stale
            // bridge-applied reason.
            if (node.reason == reasons::NO_NODE || node.reason == reasons::ZOMBIE_NODE)
                && node.state.is_idle()
                && node.state.is_powered_down()
            {
                info!(node = %name, "unsetting old reason");
                view.unset_reason(&self.slurm, &name).await;
                continue;
            }

            let Some(cc) = cc_by_name.get(&name) else {
                if node.is_joined() {
                    warn!(node = %name, "not found in the provider, but the scheduler thinks it exists");
                    warn!(node = %name, "marking node down");
                    view.mark_missing(&self.slurm, &name).await;
                } else if node.has_zombie_reason() {
                    info!(node = %name, "node no longer exists in the provider, removing zombie reason");
                    view.unset_reason(&self.slurm, &name).await;
                }
                continue;
            };

            if cc.keep_alive {
                self.add_keep_alive(&name).await;
            } else {
                self.remove_keep_alive(&name).await;
            }

            if cc.state == NodeState::Ready && !node.is_joined() {
                if !node.state.is_powering_up() && !node.is_down_by_bridge() {
                    warn!(node = %name, "node is off in the scheduler, but the provider has a running VM");
                    warn!(node = %name, "marking down (zombie); resolve with one of:");
                    warn!("    - scontrol update nodename={} state=power_down", name);
                    warn!("    - sbridge suspend --node-list {}", name);
                    warn!("    - or terminate the VM at the provider");
                    view.mark_zombie(&self.slurm, &name).await;
                }
                // Still powering up, or a zombie awaiting an operator.
                continue;
            }

            // Past this point the node cannot be a zombie.
            if node.has_zombie_reason() {
                info!(
                    node = %name,
                    provider_state = %cc.state,
                    "removing zombie reason"
                );
                view.unset_reason(&self.slurm, &name).await;
            }

            if cc.state == NodeState::Failed {
                if node.is_joined() {
                    // A joined node in a failed state is left to the
                    // scheduler's own health path.
                    warn!(node = %name, "node is in a failed state, ignoring");
                } else if !node.state.is_down() {
                    warn!(node = %name, "node failed before joining, marking down");
                    view.mark_failed(&self.slurm, &name).await;
                }
                *summary.state_counts.entry("Failed".to_string()).or_default() += 1;
                continue;
            }

            if node.is_down_by_bridge() {
                // The provider has a record again; return it to service.
                view.recover(&self.slurm, &name, "").await;
            } else if node.state.is_down()
                && node.reason == reasons::NODE_FAILURE
                && cc.state == NodeState::Ready
            {
                view.recover(&self.slurm, &name, reasons::NODE_RECOVERY).await;
            }

            if cc.state == NodeState::Ready {
                ready_nodes.push(cc.clone());
            }
            *summary.state_counts.entry(cc.state.to_string()).or_default() += 1;
        }

        self.assign_addresses(&mut view, &ready_nodes).await;
        summary.ready = ready_nodes.iter().map(|n| n.name.clone()).collect();

        // Membership updates above must land in the snapshot this pass.
        self.suspend_exc = self.keep_alive.refresh(&self.slurm).await?;

        let tally = summary
            .state_counts
            .iter()
            .map(|(state, count)| format!("{}={}", state, count))
            .collect::<Vec<_>>()
            .join(", ");
        info!(states = %tally, ready = summary.ready.len(), "pass complete");
        Ok(summary)
    }

    fn log_convergence(&self, cc_nodes: &[ProviderNode]) {
        let mut by_state: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for node in cc_nodes {
            by_state.entry(node.state.to_string()).or_default().push(&node.name);
        }
        let message = by_state
            .iter()
            .map(|(state, names)| {
                if state == "Ready" {
                    format!("Ready={}", names.len())
                } else {
                    format!("{}={}:{}", state, names.len(), names.join(","))
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        info!("converging nodes with the following states: {}", message);
    }

    /// Point the scheduler at each ready node's private IP, once per
    /// (name, ip) pair, unless the node resolves by its own name.
    async fn assign_addresses(&mut self, view: &mut SlurmView, ready_nodes: &[ProviderNode]) {
        for cc in ready_nodes {
            if cc.software_configuration.use_nodename_as_hostname() {
                continue;
            }
            let Some(ip) = cc.private_ip.clone() else {
                error!(node = %cc.name, "ready node has no private IP yet");
                continue;
            };
            let key = (cc.name.clone(), ip.clone());
            if self.assigned_addrs.contains(&key) {
                continue;
            }
            let current = view.get(&cc.name).map(|n| n.node_addr().to_string());
            if current.as_deref() == Some(ip.as_str())
                || view.assign_addr(&self.slurm, &cc.name, &ip).await
            {
                self.assigned_addrs.insert(key);
            }
        }
    }

    async fn add_keep_alive(&mut self, name: &str) {
        if !self.suspend_exc.contains(name) {
            info!(node = name, "adding to SuspendExcNodes");
            let mut list: Vec<String> = self.suspend_exc.iter().cloned().collect();
            list.push(name.to_string());
            list.sort();
            match self.slurm.update_suspend_exc_nodes(&list.join(",")).await {
                Ok(()) => {
                    self.suspend_exc.insert(name.to_string());
                }
                Err(e) => {
                    error!(node = name, error = %e, "failed to update SuspendExcNodes");
                    return;
                }
            }
        }
        if self.active_keep_alive.insert(name.to_string()) {
            info!(node = name, "node has keep-alive");
        }
    }

    async fn remove_keep_alive(&mut self, name: &str) {
        if !self.suspend_exc.contains(name) {
            self.active_keep_alive.remove(name);
            return;
        }
        if !self.active_keep_alive.contains(name) {
            // Entry predates this process; the list is shared with
            // operators, so leave it alone.
            info!(
                node = name,
                "leaving SuspendExcNodes entry in place, no keep-alive history found"
            );
            return;
        }
        info!(node = name, "removing from SuspendExcNodes");
        let mut list: Vec<String> =
            self.suspend_exc.iter().filter(|n| *n != name).cloned().collect();
        list.sort();
        match self.slurm.update_suspend_exc_nodes(&list.join(",")).await {
            Ok(()) => {
                self.suspend_exc.remove(name);
                self.active_keep_alive.remove(name);
                info!(node = name, "node no longer has keep-alive");
            }
            Err(e) => {
                error!(node = name, error = %e, "failed to update SuspendExcNodes");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sbridge_core::ManualClock;
    use sbridge_provider::mock::MockFleet;
    use sbridge_sched::mock::MockSlurm;
    use tempfile::TempDir;

    use super::*;

    struct Harness {
        slurm_cli: Arc<MockSlurm>,
        fleet: Arc<MockFleet>,
        reconciler: Reconciler,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let slurm_cli = Arc::new(MockSlurm::new());
        let fleet = Arc::new(MockFleet::new());
        let slurm = Arc::new(SlurmClient::new(
            slurm_cli.clone(),
            Arc::new(ManualClock::default()),
        ));
        let reconciler = Reconciler::new(
            slurm,
            fleet.clone(),
            KeepAliveFile::new(dir.path().join("keep_alive.conf")),
        );
        Harness { slurm_cli, fleet, reconciler, _dir: dir }
    }

    #[tokio::test]
    async fn noop_on_empty_cluster() {
        let mut h = harness();
        let summary = h.reconciler.run_once().await.unwrap();
        assert!(summary.state_counts.is_empty());
        assert_eq!(h.slurm_cli.update_count(), 0);
    }

    #[tokio::test]
    async fn zombie_node_is_marked_down() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.slurm_cli.set_node_state("hpc-1", "down+powered_down");
        h.fleet.add_node("hpc-1", "hpc");
        h.fleet.update_state(NodeState::Ready, &["hpc-1"]);

        h.reconciler.run_once().await.unwrap();

        let node = h.slurm_cli.node("hpc-1").unwrap();
        assert_eq!(node.state, "down");
        assert_eq!(node.reason, reasons::ZOMBIE_NODE);
        assert_eq!(node.node_addr, "hpc-1");
        assert_eq!(node.node_host_name, "hpc-1");
    }

    #[tokio::test]
    async fn missing_node_is_marked_down() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");

        h.reconciler.run_once().await.unwrap();

        let node = h.slurm_cli.node("hpc-1").unwrap();
        assert_eq!(node.state, "down");
        assert_eq!(node.reason, reasons::NO_NODE);
        assert_eq!(node.node_addr, "hpc-1");
    }

    #[tokio::test]
    async fn missing_node_recovers_when_the_record_returns() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.slurm_cli.set_node_state("hpc-1", "down");
        h.fleet.add_node("hpc-1", "hpc");
        h.fleet.update_state(NodeState::Ready, &["hpc-1"]);
        h.fleet.assign_ip(&["hpc-1"]);

        // install the bridge reason through the real path
        let slurm = SlurmClient::new(h.slurm_cli.clone(), Arc::new(ManualClock::default()));
        slurm
            .update_node("hpc-1", &[("Reason", reasons::NO_NODE)])
            .await
            .unwrap();

        let summary = h.reconciler.run_once().await.unwrap();
        assert_eq!(summary.ready, vec!["hpc-1"]);

        let node = h.slurm_cli.node("hpc-1").unwrap();
        assert_eq!(node.state, "idle");
        assert_eq!(node.reason, "");
    }

    #[tokio::test]
    async fn stale_reason_is_cleared_once_powered_down() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.slurm_cli.set_node_state("hpc-1", "idle+powered_down");
        let slurm = SlurmClient::new(h.slurm_cli.clone(), Arc::new(ManualClock::default()));
        slurm
            .update_node("hpc-1", &[("Reason", reasons::NO_NODE)])
            .await
            .unwrap();

        h.reconciler.run_once().await.unwrap();
        assert_eq!(h.slurm_cli.node("hpc-1").unwrap().reason, "");
    }

    #[tokio::test]
    async fn zombie_reason_is_cleared_when_the_vm_is_gone() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.slurm_cli.set_node_state("hpc-1", "powered_down");
        let slurm = SlurmClient::new(h.slurm_cli.clone(), Arc::new(ManualClock::default()));
        slurm
            .update_node("hpc-1", &[("Reason", reasons::ZOMBIE_NODE)])
            .await
            .unwrap();

        h.reconciler.run_once().await.unwrap();
        assert_eq!(h.slurm_cli.node("hpc-1").unwrap().reason, "");
    }

    #[tokio::test]
    async fn unjoined_failed_node_is_marked_down_then_recovers() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.slurm_cli.set_node_state("hpc-1", "powering_up");
        h.fleet.add_node("hpc-1", "hpc");
        h.fleet.update_state(NodeState::Failed, &["hpc-1"]);

        h.reconciler.run_once().await.unwrap();
        let node = h.slurm_cli.node("hpc-1").unwrap();
        assert_eq!(node.state, "down");
        assert_eq!(node.reason, reasons::NODE_FAILURE);

        h.fleet.update_state(NodeState::Ready, &["hpc-1"]);
        h.fleet.assign_ip(&["hpc-1"]);
        h.reconciler.run_once().await.unwrap();
        let node = h.slurm_cli.node("hpc-1").unwrap();
        assert_eq!(node.state, "idle");
        assert_eq!(node.reason, reasons::NODE_RECOVERY);
    }

    #[tokio::test]
    async fn joined_failed_node_is_left_to_the_scheduler() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.fleet.add_node("hpc-1", "hpc");
        h.fleet.update_state(NodeState::Failed, &["hpc-1"]);

        h.reconciler.run_once().await.unwrap();
        let node = h.slurm_cli.node("hpc-1").unwrap();
        assert_eq!(node.state, "idle", "joined failed nodes are warn-only");
        assert_eq!(h.slurm_cli.update_count(), 0);
    }

    #[tokio::test]
    async fn ready_node_gets_its_address_assigned_once() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.fleet.add_node("hpc-1", "hpc");
        h.fleet.update_state(NodeState::Ready, &["hpc-1"]);
        h.fleet.assign_ip(&["hpc-1"]);

        h.reconciler.run_once().await.unwrap();
        let node = h.slurm_cli.node("hpc-1").unwrap();
        assert_eq!(node.node_addr, "10.1.0.1");
        assert_eq!(node.node_host_name, "10.1.0.1");

        let before = h.slurm_cli.update_count();
        h.reconciler.run_once().await.unwrap();
        assert_eq!(h.slurm_cli.update_count(), before, "address assigned exactly once");
    }

    #[tokio::test]
    async fn back_to_back_passes_issue_no_updates() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.slurm_cli.add_node("htc-1", "htc");
        h.slurm_cli.set_node_state("htc-1", "idle+powered_down");
        h.fleet.add_node("hpc-1", "hpc");
        h.fleet.update_state(NodeState::Ready, &["hpc-1"]);
        h.fleet.assign_ip(&["hpc-1"]);

        h.reconciler.run_once().await.unwrap();
        let after_first = h.slurm_cli.update_count();
        h.reconciler.run_once().await.unwrap();
        assert_eq!(h.slurm_cli.update_count(), after_first);
    }

    #[tokio::test]
    async fn keep_alive_nodes_enter_suspend_exc() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.fleet.add_node("hpc-1", "hpc");
        h.fleet.update_state(NodeState::Ready, &["hpc-1"]);
        h.fleet.assign_ip(&["hpc-1"]);
        h.fleet.set_keep_alive("hpc-1", true);

        h.reconciler.run_once().await.unwrap();
        assert_eq!(h.slurm_cli.suspend_exc(), "hpc-1");
    }

    #[tokio::test]
    async fn keep_alive_removal_requires_prior_evidence() {
        let mut h = harness();
        for name in ["hpc-1", "hpc-2"] {
            h.slurm_cli.add_node(name, "hpc");
            h.fleet.add_node(name, "hpc");
            h.fleet.update_state(NodeState::Ready, &[name]);
        }
        h.fleet.assign_ip(&["hpc-1", "hpc-2"]);
        h.slurm_cli.set_suspend_exc("hpc-1,hpc-2");
        h.fleet.set_keep_alive("hpc-1", true);
        h.fleet.set_keep_alive("hpc-2", true);

        // First pass records the keep-alive evidence for both.
        h.reconciler.run_once().await.unwrap();
        assert_eq!(h.slurm_cli.suspend_exc(), "hpc-1,hpc-2");

        // Flag drops on hpc-2: the bridge removes the entry it owns.
        h.fleet.set_keep_alive("hpc-2", false);
        h.reconciler.run_once().await.unwrap();
        assert_eq!(h.slurm_cli.suspend_exc(), "hpc-1");

        let snapshot = std::fs::read_to_string(h.reconciler.keep_alive.path()).unwrap();
        assert_eq!(snapshot, "# Managed by sbridged\nSuspendExcNodes          = hpc-1");
    }

    #[tokio::test]
    async fn foreign_suspend_exc_entries_are_left_alone() {
        let mut h = harness();
        h.slurm_cli.add_node("hpc-1", "hpc");
        h.slurm_cli.set_suspend_exc("hpc-1,operator-node");
        h.fleet.add_node("hpc-1", "hpc");
        h.fleet.update_state(NodeState::Ready, &["hpc-1"]);
        h.fleet.assign_ip(&["hpc-1"]);

        // hpc-1 has keep_alive=false and no recorded evidence; the
        // entry stays because this process never added it.
        h.reconciler.run_once().await.unwrap();
        assert_eq!(h.slurm_cli.suspend_exc(), "hpc-1,operator-node");
    }
}
