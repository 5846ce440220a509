use std::sync::Arc;

use sbridge_core::{retry, Clock, CommandOutput, DEFAULT_ATTEMPTS};
use sbridge_domain::{sort_nodes, SchedulerNode};
use tracing::{error, info};

use crate::cli::{SlurmCli, SrunOptions};
use crate::error::SchedError;
use crate::parse::parse_show_nodes;

pub const DEFAULT_MAX_NODES_IN_LIST: usize = 500;
pub const MAX_NODES_ENV: &str = "SBRIDGE_MAX_NODES_IN_LIST";

/// Node states that make a host unusable for cluster-wide operations.
const UNAVAILABLE_STATES: &str = "powered_down,powering_up,powering_down,power_down,drain,drained,draining,unknown,down,no_respond,fail,reboot";

/// High-level scheduler adapter. Read-only calls retry with backoff;
/// mutating calls retry only because repeating the same `update` is
/// idempotent; `ping` never retries.
pub struct SlurmClient {
    cli: Arc<dyn SlurmCli>,
    clock: Arc<dyn Clock>,
    max_nodes_in_list: usize,
}

impl SlurmClient {
    pub fn new(cli: Arc<dyn SlurmCli>, clock: Arc<dyn Clock>) -> Self {
        let max_nodes_in_list = std::env::var(MAX_NODES_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_NODES_IN_LIST);
        Self { cli, clock, max_nodes_in_list }
    }

    pub fn with_max_nodes_in_list(mut self, max: usize) -> Self {
        self.max_nodes_in_list = max.max(1);
        self
    }

    pub fn cli(&self) -> &Arc<dyn SlurmCli> {
        &self.cli
    }

    async fn scontrol_retry(&self, args: &[String]) -> Result<String, SchedError> {
        retry(self.clock.as_ref(), DEFAULT_ATTEMPTS, move || async move {
            self.cli.scontrol(args).await
        })
        .await
    }

    async fn sinfo_retry(&self, args: &[String]) -> Result<String, SchedError> {
        retry(self.clock.as_ref(), DEFAULT_ATTEMPTS, move || async move {
            self.cli.sinfo(args).await
        })
        .await
    }

    /// True iff the control daemon answers. Never retried.
    pub async fn ping(&self) -> bool {
        self.cli.scontrol(&["ping".to_string()]).await.is_ok()
    }

    /// Fetch scheduler node records, paginating name lists so a single
    /// invocation never exceeds `max_nodes_in_list` names.
    pub async fn show_nodes(
        &self,
        names: Option<&[String]>,
    ) -> Result<Vec<SchedulerNode>, SchedError> {
        let base = ["show".to_string(), "nodes".to_string()];
        let Some(names) = names else {
            let stdout = self.scontrol_retry(&base).await?;
            return Ok(parse_show_nodes(&stdout));
        };

        let mut nodes = Vec::new();
        for chunk in names.chunks(self.max_nodes_in_list) {
            if chunk.is_empty() {
                continue;
            }
            let mut args = base.to_vec();
            args.push(chunk.join(","));
            let stdout = self.scontrol_retry(&args).await?;
            nodes.extend(parse_show_nodes(&stdout));
        }
        Ok(nodes)
    }

    /// Batched `scontrol update NodeName=… k=v …`.
    pub async fn update_node(
        &self,
        name: &str,
        assignments: &[(&str, &str)],
    ) -> Result<(), SchedError> {
        let mut args = vec!["update".to_string(), format!("NodeName={}", name)];
        args.extend(assignments.iter().map(|(k, v)| format!("{}={}", k, v)));
        info!(command = %args.join(" "), "scontrol");
        self.scontrol_retry(&args).await?;
        Ok(())
    }

    /// Like [`update_node`](Self::update_node) but logs and swallows the
    /// failure, so one bad node never aborts a reconciliation pass.
    pub async fn try_update_node(&self, name: &str, assignments: &[(&str, &str)]) -> bool {
        match self.update_node(name, assignments).await {
            Ok(()) => true,
            Err(e) => {
                error!(node = name, error = %e, "scontrol update failed");
                false
            }
        }
    }

    /// Set the scheduler's global SuspendExcNodes list.
    pub async fn update_suspend_exc_nodes(&self, node_expr: &str) -> Result<(), SchedError> {
        let value = if node_expr.is_empty() { "(null)" } else { node_expr };
        let args = vec!["update".to_string(), format!("SuspendExcNodes={}", value)];
        info!(command = %args.join(" "), "scontrol");
        self.scontrol_retry(&args).await?;
        Ok(())
    }

    /// Compact a name list into a hostlist expression. Names are sorted
    /// by trailing index first so the output is deterministic.
    pub async fn to_hostlist(&self, names: &[String]) -> Result<String, SchedError> {
        assert!(!names.is_empty());
        assert!(names.iter().all(|n| !n.is_empty()));

        let mut sorted = names.to_vec();
        sort_nodes(&mut sorted, false);

        let mut parts = Vec::new();
        for chunk in sorted.chunks(self.max_nodes_in_list) {
            let args = vec![
                "show".to_string(),
                "hostlist".to_string(),
                chunk.join(","),
            ];
            parts.push(self.scontrol_retry(&args).await?);
        }
        Ok(parts.join(","))
    }

    /// Expand a hostlist expression into individual names.
    pub async fn from_hostlist(&self, expr: &str) -> Result<Vec<String>, SchedError> {
        let sub_exprs: Vec<&str> = expr.split(',').filter(|s| !s.is_empty()).collect();
        let mut names = Vec::new();
        for chunk in sub_exprs.chunks(self.max_nodes_in_list) {
            let args = vec![
                "show".to_string(),
                "hostnames".to_string(),
                chunk.join(","),
            ];
            let stdout = self.scontrol_retry(&args).await?;
            names.extend(stdout.split_whitespace().map(String::from));
        }
        Ok(names)
    }

    pub async fn show_config(&self) -> Result<String, SchedError> {
        self.scontrol_retry(&["show".to_string(), "config".to_string()])
            .await
    }

    /// Ask the control daemon to reload its configuration files.
    pub async fn reconfigure(&self) -> Result<(), SchedError> {
        self.scontrol_retry(&["reconfigure".to_string()]).await?;
        Ok(())
    }

    // ── Reservations (used by the scaling helper) ────────────────────────────

    pub async fn create_reservation(
        &self,
        name: &str,
        node_expr: &str,
    ) -> Result<(), SchedError> {
        let args = vec![
            "create".to_string(),
            "reservation".to_string(),
            format!("ReservationName={}", name),
            format!("Nodes={}", node_expr),
            "Flags=maint".to_string(),
            "Users=root".to_string(),
            "StartTime=now".to_string(),
            "Duration=infinite".to_string(),
        ];
        self.scontrol_retry(&args).await?;
        Ok(())
    }

    pub async fn delete_reservation(&self, name: &str) -> Result<(), SchedError> {
        let args = vec!["delete".to_string(), format!("ReservationName={}", name)];
        self.scontrol_retry(&args).await?;
        Ok(())
    }

    /// Returns `None` when the reservation does not exist.
    pub async fn show_reservation(&self, name: &str) -> Result<Option<String>, SchedError> {
        let args = vec![
            "show".to_string(),
            "reservation".to_string(),
            name.to_string(),
        ];
        match self.cli.scontrol(&args).await {
            Ok(stdout) => Ok(Some(stdout)),
            Err(SchedError::Exec(sbridge_core::ExecError::CommandFailed { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── sinfo-backed listings (topology builder) ─────────────────────────────

    pub async fn list_partitions(&self) -> Result<Vec<String>, SchedError> {
        let args = vec!["-o".to_string(), "%P".to_string(), "-h".to_string()];
        let stdout = self.sinfo_retry(&args).await?;
        let mut partitions: Vec<String> = stdout
            .lines()
            .map(|l| l.trim().trim_end_matches('*').to_string())
            .filter(|l| !l.is_empty())
            .collect();
        partitions.dedup();
        Ok(partitions)
    }

    /// All hostnames in a partition, expanded.
    pub async fn partition_hostnames(&self, partition: &str) -> Result<Vec<String>, SchedError> {
        let args = vec![
            "-p".to_string(),
            partition.to_string(),
            "-o".to_string(),
            "%N".to_string(),
            "-h".to_string(),
        ];
        let expr = self.sinfo_retry(&args).await?;
        let expr = expr.split_whitespace().collect::<Vec<_>>().join(",");
        if expr.is_empty() {
            return Ok(Vec::new());
        }
        self.from_hostlist(&expr).await
    }

    /// Hostnames in a partition that are not fully powered up and idle.
    pub async fn unavailable_hostnames(
        &self,
        partition: &str,
    ) -> Result<Vec<String>, SchedError> {
        let args = vec![
            "-p".to_string(),
            partition.to_string(),
            "-t".to_string(),
            UNAVAILABLE_STATES.to_string(),
            "-o".to_string(),
            "%N".to_string(),
            "-h".to_string(),
        ];
        let expr = self.sinfo_retry(&args).await?;
        let expr = expr.split_whitespace().collect::<Vec<_>>().join(",");
        if expr.is_empty() {
            return Ok(Vec::new());
        }
        self.from_hostlist(&expr).await
    }

    /// Run a command on cluster nodes. Not retried: a second submission
    /// would queue a second job.
    pub async fn srun(
        &self,
        hosts: &[String],
        command: &str,
        opts: &SrunOptions,
    ) -> Result<CommandOutput, SchedError> {
        self.cli.srun(hosts, command, opts).await
    }
}
