use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sbridge_core::Clock;
use sbridge_domain::reasons;
use sbridge_partition::Partition;
use sbridge_provider::{AllocateSpec, Bucket, FleetClient, HostnamePolicy, ProviderError};
use sbridge_sched::SlurmClient;
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::wait::wait_for_resume;

#[derive(Debug, Clone)]
pub struct ResumeOptions {
    pub no_wait: bool,
    pub wait_budget: Duration,
    pub poll_interval: Duration,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self {
            no_wait: false,
            wait_budget: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// What happened to each requested name by the time the call returned.
#[derive(Debug, Clone, Default)]
pub struct ResumeSummary {
    pub allocated: Vec<String>,
    pub ready: Vec<String>,
    pub failed: Vec<String>,
    /// Names that vanished from the provider inventory mid-boot.
    pub gone: Vec<String>,
    pub timed_out: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct Dispatcher {
    slurm: Arc<SlurmClient>,
    fleet: Arc<dyn FleetClient>,
    clock: Arc<dyn Clock>,
    hostname_policy: HostnamePolicy,
}

impl Dispatcher {
    pub fn new(
        slurm: Arc<SlurmClient>,
        fleet: Arc<dyn FleetClient>,
        clock: Arc<dyn Clock>,
        hostname_policy: HostnamePolicy,
    ) -> Self {
        Self { slurm, fleet, clock, hostname_policy }
    }

    /// Resolve every requested name to a partition, allocate and boot
    /// the provider nodes, then (unless `no_wait`) poll until every name
    /// reaches a terminal classification or the budget elapses.
    ///
    /// Unknown names fail the whole call before any provider mutation.
    pub async fn resume(
        &self,
        partitions: &mut [Partition],
        node_list: &[String],
        opts: &ResumeOptions,
    ) -> Result<ResumeSummary, DispatchError> {
        let mut summary = ResumeSummary::default();
        if node_list.is_empty() {
            return Ok(summary);
        }

        let mut name_to_partition = index_static_names(partitions);
        self.claim_dynamic_nodes(partitions, node_list, &mut name_to_partition)
            .await?;

        // Names whose provider record cannot be resumed are skipped,
        // never failed: the scheduler will retry them.
        let existing: HashMap<String, _> = self
            .fleet
            .list_nodes()
            .await?
            .into_iter()
            .map(|n| (n.name.clone(), n))
            .collect();

        let mut to_start: Vec<String> = Vec::new();
        for name in node_list {
            if let Some(node) = existing.get(name) {
                if !node.state.is_resumable() {
                    info!(node = %name, state = %node.state, "already exists, skipping");
                    summary.skipped.push(name.clone());
                    continue;
                }
            }
            to_start.push(name.clone());
        }

        for name in &to_start {
            let partition = &partitions[name_to_partition[name]];
            let bucket = partition.bucket_for_node(name)?;
            let spec = AllocateSpec {
                bucket_id: bucket.bucket_id.clone(),
                count: 1,
                exclusive: true,
                colocated: partition.is_hpc,
            };
            let hook = |_: &Bucket, index: u32| {
                if index != 1 {
                    return Err(ProviderError::NameHook(format!(
                        "could not claim name {} at index {}; does the node already exist in a terminating state?",
                        name, index
                    )));
                }
                Ok(name.clone())
            };
            match self.fleet.allocate(&spec, &hook).await {
                Ok(result) if result.nodes.len() == 1 => summary.allocated.push(name.clone()),
                Ok(result) => {
                    warn!(node = %name, count = result.nodes.len(), "unexpected allocation size");
                    summary.failed.push(name.clone());
                }
                Err(e) => {
                    warn!(node = %name, error = %e, "allocation failed");
                    summary.failed.push(name.clone());
                }
            }
        }

        if summary.allocated.is_empty() {
            return Ok(summary);
        }

        let boot = self.fleet.bootup(&summary.allocated).await?;
        info!(
            operation_id = %boot.operation_id,
            nodes = %summary.allocated.join(","),
            "bootup dispatched"
        );

        if opts.no_wait {
            return Ok(summary);
        }

        let allocated = summary.allocated.clone();
        wait_for_resume(
            self.fleet.as_ref(),
            &self.slurm,
            self.clock.as_ref(),
            &self.hostname_policy,
            &boot.operation_id,
            &allocated,
            opts,
            &mut summary,
        )
        .await?;
        Ok(summary)
    }

    /// Names not owned by any static partition are matched to a dynamic
    /// partition by the feature set the scheduler reports for them.
    async fn claim_dynamic_nodes(
        &self,
        partitions: &mut [Partition],
        node_list: &[String],
        name_to_partition: &mut HashMap<String, usize>,
    ) -> Result<(), DispatchError> {
        let unresolved: Vec<String> = node_list
            .iter()
            .filter(|n| !name_to_partition.contains_key(*n))
            .cloned()
            .collect();
        if unresolved.is_empty() {
            return Ok(());
        }

        let feature_to_partition = index_dynamic_features(partitions);
        let sched_nodes = self.slurm.show_nodes(Some(&unresolved)).await?;
        let by_name: HashMap<&str, _> =
            sched_nodes.iter().map(|n| (n.name.as_str(), n)).collect();

        let mut claims: Vec<(String, usize)> = Vec::new();
        let mut unknown: Vec<String> = Vec::new();
        for name in &unresolved {
            let claimed = by_name
                .get(name.as_str())
                .map(|n| n.feature_key())
                .and_then(|key| feature_to_partition.get(&key).copied());
            match claimed {
                Some(idx) => claims.push((name.clone(), idx)),
                None => unknown.push(name.clone()),
            }
        }
        if !unknown.is_empty() {
            return Err(DispatchError::UnknownNodes { names: unknown });
        }
        for (name, idx) in claims {
            partitions[idx].add_dynamic_node(&name, None)?;
            name_to_partition.insert(name, idx);
        }
        Ok(())
    }

    /// Power a node list back down. Nodes the scheduler already has
    /// `powered_down` are a no-op.
    pub async fn suspend(&self, node_list: &[String]) -> Result<Vec<String>, DispatchError> {
        if node_list.is_empty() {
            return Ok(Vec::new());
        }
        let sched_nodes = self.slurm.show_nodes(Some(node_list)).await?;
        let by_name: HashMap<&str, _> =
            sched_nodes.iter().map(|n| (n.name.as_str(), n)).collect();

        let mut to_shutdown = Vec::new();
        for name in node_list {
            if let Some(node) = by_name.get(name.as_str()) {
                if node.state.is_powered_down() {
                    info!(node = %name, "already powered down");
                    continue;
                }
            }
            // Point the scheduler back at the node name before the IP
            // disappears with the VM.
            self.slurm
                .try_update_node(name, &[("NodeAddr", name), ("NodeHostName", name)])
                .await;
            to_shutdown.push(name.clone());
        }
        if !to_shutdown.is_empty() {
            self.fleet.shutdown(&to_shutdown).await?;
        }
        Ok(to_shutdown)
    }

    /// Invoked by the scheduler's resume-fail hook: mark every listed
    /// name down so jobs stop landing on it.
    pub async fn resume_fail(&self, node_list: &[String]) -> Result<(), DispatchError> {
        for name in node_list {
            self.slurm
                .try_update_node(
                    name,
                    &[("State", "down"), ("Reason", reasons::NODE_FAILURE)],
                )
                .await;
        }
        Ok(())
    }
}

fn index_static_names(partitions: &[Partition]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (idx, partition) in partitions.iter().enumerate() {
        for name in partition.all_nodes() {
            index.entry(name).or_insert(idx);
        }
    }
    index
}

fn index_dynamic_features(partitions: &[Partition]) -> HashMap<String, usize> {
    let mut index: HashMap<String, usize> = HashMap::new();
    for (idx, partition) in partitions.iter().enumerate() {
        if !partition.is_dynamic() {
            continue;
        }
        for key in partition.feature_keys() {
            if let Some(first) = index.get(&key) {
                warn!(
                    feature_key = %key,
                    first = %partitions[*first].name,
                    duplicate = %partition.name,
                    "duplicate feature key, first registration wins"
                );
                continue;
            }
            index.insert(key, idx);
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use sbridge_core::ManualClock;
    use sbridge_domain::{NodeState, SoftwareConfig};
    use sbridge_provider::mock::{BootBehavior, MockFleet};
    use sbridge_sched::mock::MockSlurm;
    use serde_json::Map;

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
            software_configuration: SoftwareConfig(Map::new()),
        }
    }

    fn static_partition(name: &str) -> Partition {
        Partition::new(
            name.to_string(),
            name.to_string(),
            String::new(),
            "Standard_F4".to_string(),
            false,
            false,
            0,
            4,
            None,
            vec![bucket(&format!("b-{}", name), name)],
        )
    }

    fn dynamic_partition(name: &str, features: &str) -> Partition {
        Partition::new(
            name.to_string(),
            name.to_string(),
            String::new(),
            "Standard_F4".to_string(),
            false,
            false,
            0,
            8,
            Some(format!("Feature={}", features)),
            vec![bucket(&format!("b-{}", name), name)],
        )
    }

    struct Harness {
        slurm_cli: Arc<MockSlurm>,
        fleet: Arc<MockFleet>,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let slurm_cli = Arc::new(MockSlurm::new());
        let fleet = Arc::new(MockFleet::new());
        fleet.add_bucket(bucket("b-htc", "htc"));
        fleet.add_bucket(bucket("b-dyn", "dyn"));
        let clock = Arc::new(ManualClock::default());
        let slurm = Arc::new(SlurmClient::new(slurm_cli.clone(), clock.clone()));
        let dispatcher = Dispatcher::new(
            slurm,
            fleet.clone(),
            clock,
            HostnamePolicy::default(),
        );
        Harness { slurm_cli, fleet, dispatcher }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn no_wait() -> ResumeOptions {
        ResumeOptions { no_wait: true, ..Default::default() }
    }

    #[tokio::test]
    async fn empty_resume_list_is_accepted_with_zero_actions() {
        let h = harness();
        let mut partitions = vec![static_partition("htc")];
        let summary = h.dispatcher.resume(&mut partitions, &[], &no_wait()).await.unwrap();
        assert!(summary.allocated.is_empty());
        assert!(h.fleet.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_names_abort_before_any_provider_mutation() {
        let h = harness();
        let mut partitions = vec![static_partition("htc")];
        let err = h
            .dispatcher
            .resume(&mut partitions, &names(&["ghost-1", "htc-1"]), &no_wait())
            .await
            .unwrap_err();
        match err {
            DispatchError::UnknownNodes { names } => assert_eq!(names, vec!["ghost-1"]),
            other => panic!("unexpected error: {}", other),
        }
        assert!(h.fleet.calls().is_empty(), "no mutation may precede the abort");
    }

    #[tokio::test]
    async fn static_resume_allocates_and_boots() {
        let h = harness();
        let mut partitions = vec![static_partition("htc")];
        let summary = h
            .dispatcher
            .resume(&mut partitions, &names(&["htc-1", "htc-2"]), &no_wait())
            .await
            .unwrap();
        assert_eq!(summary.allocated, vec!["htc-1", "htc-2"]);
        let calls = h.fleet.calls();
        assert!(calls.contains(&"allocate b-htc htc-1".to_string()));
        assert!(calls.contains(&"allocate b-htc htc-2".to_string()));
        assert!(calls.contains(&"bootup htc-1,htc-2".to_string()));
    }

    #[tokio::test]
    async fn dynamic_resume_claims_by_feature_match() {
        let h = harness();
        h.slurm_cli.add_node("myd-1", "dyn");
        h.slurm_cli.set_node_features("myd-1", &["dyn"]);

        let mut partitions =
            vec![static_partition("htc"), dynamic_partition("dyn", "dyn")];
        let summary = h
            .dispatcher
            .resume(&mut partitions, &names(&["myd-1"]), &no_wait())
            .await
            .unwrap();
        assert_eq!(summary.allocated, vec!["myd-1"]);
        assert!(h.fleet.calls().contains(&"allocate b-dyn myd-1".to_string()));
        assert_eq!(partitions[1].all_nodes(), vec!["myd-1"]);
    }

    #[tokio::test]
    async fn names_in_non_resumable_states_are_skipped() {
        let h = harness();
        h.fleet.add_node("htc-1", "htc");
        h.fleet.update_state(NodeState::Ready, &["htc-1"]);

        let mut partitions = vec![static_partition("htc")];
        let summary = h
            .dispatcher
            .resume(&mut partitions, &names(&["htc-1", "htc-2"]), &no_wait())
            .await
            .unwrap();
        assert_eq!(summary.skipped, vec!["htc-1"]);
        assert_eq!(summary.allocated, vec!["htc-2"]);
        assert!(!h.fleet.calls().contains(&"allocate b-htc htc-1".to_string()));
    }

    #[tokio::test]
    async fn wait_assigns_node_addr_once_ready() {
        let h = harness();
        h.fleet.set_boot_behavior(BootBehavior::BecomeReady);
        h.slurm_cli.add_node("htc-1", "htc");

        let mut partitions = vec![static_partition("htc")];
        let summary = h
            .dispatcher
            .resume(&mut partitions, &names(&["htc-1"]), &ResumeOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.ready, vec!["htc-1"]);
        assert!(summary.failed.is_empty());

        let node = h.slurm_cli.node("htc-1").unwrap();
        assert_eq!(node.node_addr, "10.1.0.1");
        assert_eq!(node.node_host_name, "10.1.0.1");
    }

    #[tokio::test]
    async fn vanished_nodes_are_reported_gone() {
        let h = harness();
        h.fleet.set_boot_behavior(BootBehavior::Vanish);
        h.slurm_cli.add_node("htc-1", "htc");

        let mut partitions = vec![static_partition("htc")];
        let summary = h
            .dispatcher
            .resume(&mut partitions, &names(&["htc-1"]), &ResumeOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.gone, vec!["htc-1"]);
        assert!(summary.ready.is_empty());
        assert!(summary.failed.is_empty());
        assert!(summary.timed_out.is_empty());
    }

    #[tokio::test]
    async fn failed_boot_marks_the_node_down() {
        let h = harness();
        h.fleet.set_boot_behavior(BootBehavior::BecomeFailed);
        h.slurm_cli.add_node("htc-1", "htc");

        let mut partitions = vec![static_partition("htc")];
        let summary = h
            .dispatcher
            .resume(&mut partitions, &names(&["htc-1"]), &ResumeOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.failed, vec!["htc-1"]);

        let node = h.slurm_cli.node("htc-1").unwrap();
        assert_eq!(node.state, "down");
        assert_eq!(node.reason, reasons::NODE_FAILURE);
    }

    #[tokio::test]
    async fn suspend_of_powered_down_nodes_is_a_no_op() {
        let h = harness();
        h.slurm_cli.add_node("htc-1", "htc");
        h.slurm_cli.set_node_state("htc-1", "idle+powered_down");

        let shut = h.dispatcher.suspend(&names(&["htc-1"])).await.unwrap();
        assert!(shut.is_empty());
        assert!(h.fleet.calls().is_empty());
        assert_eq!(h.slurm_cli.update_count(), 0);
    }

    #[tokio::test]
    async fn suspend_resets_the_address_and_shuts_down() {
        let h = harness();
        h.fleet.add_node("htc-1", "htc");
        h.slurm_cli.add_node("htc-1", "htc");

        let shut = h.dispatcher.suspend(&names(&["htc-1"])).await.unwrap();
        assert_eq!(shut, vec!["htc-1"]);
        assert!(h.fleet.calls().contains(&"shutdown htc-1".to_string()));

        let node = h.slurm_cli.node("htc-1").unwrap();
        assert_eq!(node.node_addr, "htc-1");
    }

    #[tokio::test]
    async fn resume_fail_marks_names_down() {
        let h = harness();
        h.slurm_cli.add_node("htc-1", "htc");
        h.dispatcher.resume_fail(&names(&["htc-1"])).await.unwrap();
        let node = h.slurm_cli.node("htc-1").unwrap();
        assert_eq!(node.state, "down");
        assert_eq!(node.reason, reasons::NODE_FAILURE);
    }
}
