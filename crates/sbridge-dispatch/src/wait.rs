use std::collections::{BTreeMap, HashMap, HashSet};

use sbridge_core::Clock;
use sbridge_domain::{reasons, NodeState, ProviderNode, TargetState};
use sbridge_provider::{FleetClient, HostnamePolicy};
use sbridge_sched::SlurmClient;
use tracing::{error, info, warn};

use crate::dispatcher::{ResumeOptions, ResumeSummary};
use crate::error::DispatchError;

/// Poll the provider until every booted name reaches a terminal
/// classification (`ready`, `failed`, `gone`) or the budget elapses.
/// Timeout is a warning, not a failure: the reconciler picks up the
/// stragglers.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn wait_for_resume(
    fleet: &dyn FleetClient,
    slurm: &SlurmClient,
    clock: &dyn Clock,
    hostname_policy: &HostnamePolicy,
    operation_id: &str,
    names: &[String],
    opts: &ResumeOptions,
    summary: &mut ResumeSummary,
) -> Result<(), DispatchError> {
    let deadline =
        clock.now() + chrono::TimeDelta::from_std(opts.wait_budget).unwrap_or_default();
    let nodes_str = names.iter().take(5).cloned().collect::<Vec<_>>().join(",");

    let mut failed_names: HashSet<String> = HashSet::new();
    let mut gone_names: HashSet<String> = HashSet::new();
    let mut assigned_addrs: HashSet<(String, String)> = HashSet::new();
    let mut previous_states: BTreeMap<String, usize> = BTreeMap::new();
    let mut ready_names: Vec<String> = Vec::new();

    loop {
        ready_names.clear();
        let mut states: BTreeMap<String, usize> = BTreeMap::new();
        let mut terminal = 0usize;

        let by_name: HashMap<String, ProviderNode> = fleet
            .list_nodes()
            .await?
            .into_iter()
            .map(|n| (n.name.clone(), n))
            .collect();

        let mut ready_nodes: Vec<&ProviderNode> = Vec::new();
        for name in names {
            let Some(node) = by_name.get(name) else {
                *states.entry("Deleted".to_string()).or_default() += 1;
                terminal += 1;
                if gone_names.insert(name.clone()) {
                    warn!(node = %name, "node disappeared from the provider while booting");
                }
                continue;
            };
            gone_names.remove(name);

            if node.state == NodeState::Failed {
                *states.entry("Failed".to_string()).or_default() += 1;
                terminal += 1;
                if failed_names.insert(name.clone()) {
                    error!(node = %name, "node failed to start");
                    slurm
                        .try_update_node(
                            name,
                            &[("State", "down"), ("Reason", reasons::NODE_FAILURE)],
                        )
                        .await;
                }
                continue;
            }

            if failed_names.remove(name) {
                info!(node = %name, "node recovered from failure");
                slurm
                    .try_update_node(
                        name,
                        &[("State", "idle"), ("Reason", reasons::NODE_RECOVERY)],
                    )
                    .await;
            }

            if node.target_state != TargetState::Started {
                *states.entry(node.state.to_string()).or_default() += 1;
                terminal += 1;
                continue;
            }

            if node.state == NodeState::Ready {
                if node.private_ip.is_none() {
                    *states.entry("WaitingOnIPAddress".to_string()).or_default() += 1;
                } else if node.hostname.is_some() && !hostname_policy.accepts(node) {
                    // An unacceptable hostname is retried, never accepted.
                    *states.entry("WaitingOnHostname".to_string()).or_default() += 1;
                } else {
                    *states.entry("Ready".to_string()).or_default() += 1;
                    terminal += 1;
                    ready_nodes.push(node);
                    ready_names.push(name.clone());
                }
                continue;
            }

            *states.entry(node.state.to_string()).or_default() += 1;
        }

        // Point the scheduler at the VM address, once per (name, ip).
        for node in &ready_nodes {
            if node.software_configuration.use_nodename_as_hostname() {
                continue;
            }
            let Some(ip) = node.private_ip.clone() else {
                continue;
            };
            let key = (node.name.clone(), ip.clone());
            if assigned_addrs.contains(&key) {
                continue;
            }
            if slurm
                .try_update_node(&node.name, &[("NodeAddr", &ip), ("NodeHostName", &ip)])
                .await
            {
                assigned_addrs.insert(key);
            }
        }

        if states != previous_states {
            let message = states
                .iter()
                .map(|(state, count)| format!("{}={}", state, count))
                .collect::<Vec<_>>()
                .join(" , ");
            info!(
                operation_id,
                nodes = %nodes_str,
                "number of nodes in each state: {}",
                message
            );
        }

        if terminal >= names.len() {
            break;
        }
        if clock.now() >= deadline {
            let pending: Vec<String> = names
                .iter()
                .filter(|n| {
                    !ready_names.contains(n)
                        && !failed_names.contains(*n)
                        && !gone_names.contains(*n)
                })
                .cloned()
                .collect();
            warn!(
                operation_id,
                pending = %pending.join(","),
                "resume wait budget elapsed"
            );
            summary.timed_out = pending;
            break;
        }
        previous_states = states;
        clock.sleep(opts.poll_interval).await;
    }

    summary.ready = ready_names;
    summary.failed.extend(failed_names);
    summary.gone = names
        .iter()
        .filter(|n| gone_names.contains(*n))
        .cloned()
        .collect();
    info!(
        operation_id,
        nodes = %nodes_str,
        ready = summary.ready.len(),
        gone = summary.gone.len(),
        "resume wait finished"
    );
    Ok(())
}
