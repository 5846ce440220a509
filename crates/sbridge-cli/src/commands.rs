use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sbridge_core::{ChaosPolicy, ChaosRunner, Clock, CommandRunner, SystemClock, SystemRunner};
use sbridge_dispatch::{Dispatcher, ResumeOptions};
use sbridge_partition::{fetch_partitions, Partition};
use sbridge_provider::{FleetClient, RestFleet};
use sbridge_reconciler::{Daemon, KeepAliveFile, Reconciler};
use sbridge_sched::{NativeSlurm, SlurmClient};
use sbridge_topology::{
    visualize_block, visualize_tree, TopologyBuilder, TopologyInput, TopologyType,
};
use serde::Serialize;
use tracing::info;

use crate::cli::{OutputFormat, TopologyInputArg, TopologyTypeArg};
use crate::config::AppConfig;
use crate::output::render_table;

impl From<TopologyInputArg> for TopologyInput {
    fn from(arg: TopologyInputArg) -> Self {
        match arg {
            TopologyInputArg::Fabric => TopologyInput::Fabric,
            TopologyInputArg::Nvlink => TopologyInput::Nvlink,
        }
    }
}

impl From<TopologyTypeArg> for TopologyType {
    fn from(arg: TopologyTypeArg) -> Self {
        match arg {
            TopologyTypeArg::Tree => TopologyType::Tree,
            TopologyTypeArg::Block => TopologyType::Block,
        }
    }
}

/// Everything the subcommands need, built once at startup.
pub struct App {
    pub config: AppConfig,
    pub runner: Arc<dyn CommandRunner>,
    pub clock: Arc<dyn Clock>,
    pub slurm: Arc<SlurmClient>,
    pub fleet: Arc<dyn FleetClient>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let chaos = ChaosPolicy::new(config.chaos_mode);
        let runner: Arc<dyn CommandRunner> =
            Arc::new(ChaosRunner::new(SystemRunner, chaos));
        let slurm = Arc::new(SlurmClient::new(
            Arc::new(NativeSlurm::new(runner.clone())),
            clock.clone(),
        ));
        let fleet: Arc<dyn FleetClient> = Arc::new(
            RestFleet::new(
                config.connection.url.clone(),
                &config.cluster_name,
                &config.connection.username,
                &config.connection.password,
                clock.clone(),
                chaos,
            )
            .context("failed to build the provider client")?,
        );
        Ok(Self { config, runner, clock, slurm, fleet })
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.slurm.clone(),
            self.fleet.clone(),
            self.clock.clone(),
            self.config.hostname_policy(),
        )
    }

    async fn expand_node_list(&self, expr: &str) -> Result<Vec<String>> {
        Ok(self.slurm.from_hostlist(expr).await?)
    }
}

pub async fn resume(app: &App, node_list: &str, no_wait: bool) -> Result<()> {
    let names = app.expand_node_list(node_list).await?;
    let mut partitions = fetch_partitions(app.fleet.as_ref(), true).await?;
    let opts = ResumeOptions { no_wait, ..Default::default() };
    let summary = app.dispatcher().resume(&mut partitions, &names, &opts).await?;
    info!(
        allocated = summary.allocated.len(),
        ready = summary.ready.len(),
        failed = summary.failed.len(),
        gone = summary.gone.len(),
        timed_out = summary.timed_out.len(),
        skipped = summary.skipped.len(),
        "resume finished"
    );
    println!(
        "allocated={} ready={} failed={} gone={} timed_out={} skipped={}",
        summary.allocated.len(),
        summary.ready.len(),
        summary.failed.len(),
        summary.gone.len(),
        summary.timed_out.len(),
        summary.skipped.len()
    );
    Ok(())
}

pub async fn suspend(app: &App, node_list: &str) -> Result<()> {
    let names = app.expand_node_list(node_list).await?;
    let shut = app.dispatcher().suspend(&names).await?;
    println!("shutdown={} skipped={}", shut.len(), names.len() - shut.len());
    Ok(())
}

pub async fn resume_fail(app: &App, node_list: &str) -> Result<()> {
    let names = app.expand_node_list(node_list).await?;
    app.dispatcher().resume_fail(&names).await?;
    println!("marked_down={}", names.len());
    Ok(())
}

#[derive(Serialize)]
struct PartitionSnapshot {
    name: String,
    nodearray: String,
    machine_type: String,
    is_default: bool,
    is_hpc: bool,
    is_dynamic: bool,
    max_vm_count: u32,
    nodes: Vec<String>,
}

pub async fn scale(app: &App, force: bool) -> Result<()> {
    let nodes = app.slurm.show_nodes(None).await?;
    let powering_down: Vec<String> = nodes
        .iter()
        .filter(|n| n.state.is_powering_down())
        .map(|n| n.name.clone())
        .collect();
    if !powering_down.is_empty() && !force {
        bail!(
            "cannot scale while nodes are still powering down ({}); wait for them to settle or pass --force",
            powering_down.join(",")
        );
    }

    let partitions = fetch_partitions(app.fleet.as_ref(), true).await?;
    write_partition_snapshot(&app.config.partition_snapshot, &partitions)?;
    app.slurm.reconfigure().await?;
    println!(
        "wrote {} partitions to {} and reconfigured",
        partitions.len(),
        app.config.partition_snapshot.display()
    );
    Ok(())
}

fn write_partition_snapshot(path: &Path, partitions: &[Partition]) -> Result<()> {
    let snapshots: Vec<PartitionSnapshot> = partitions
        .iter()
        .map(|p| PartitionSnapshot {
            name: p.name.clone(),
            nodearray: p.nodearray.clone(),
            machine_type: p.machine_type.clone(),
            is_default: p.is_default,
            is_hpc: p.is_hpc,
            is_dynamic: p.is_dynamic(),
            max_vm_count: p.max_vm_count,
            nodes: p.all_nodes(),
        })
        .collect();
    let content = serde_json::to_string_pretty(&snapshots)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming to {}", path.display()))?;
    Ok(())
}

#[derive(Serialize)]
struct NodeRow {
    name: String,
    node_array: String,
    vm_size: String,
    state: String,
    target_state: String,
    private_ip: Option<String>,
    keep_alive: bool,
    scheduler_state: String,
    reason: String,
}

pub async fn nodes(app: &App, format: OutputFormat) -> Result<()> {
    let fleet_nodes = app.fleet.list_nodes().await?;
    let sched_nodes = app.slurm.show_nodes(None).await?;
    let sched_by_name: HashMap<&str, _> =
        sched_nodes.iter().map(|n| (n.name.as_str(), n)).collect();

    let rows: Vec<NodeRow> = fleet_nodes
        .iter()
        .map(|n| {
            let sched = sched_by_name.get(n.name.as_str());
            NodeRow {
                name: n.name.clone(),
                node_array: n.node_array.clone(),
                vm_size: n.vm_size.clone(),
                state: n.state.to_string(),
                target_state: n.target_state.to_string(),
                private_ip: n.private_ip.clone(),
                keep_alive: n.keep_alive,
                scheduler_state: sched.map(|s| s.state.to_string()).unwrap_or_default(),
                reason: sched.map(|s| s.reason.clone()).unwrap_or_default(),
            }
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Table => {
            let table_rows: Vec<Vec<String>> = rows
                .iter()
                .map(|r| {
                    vec![
                        r.name.clone(),
                        r.node_array.clone(),
                        r.vm_size.clone(),
                        r.state.clone(),
                        r.private_ip.clone().unwrap_or_default(),
                        r.scheduler_state.clone(),
                        r.reason.clone(),
                    ]
                })
                .collect();
            print!(
                "{}",
                render_table(
                    &["NAME", "ARRAY", "VM_SIZE", "STATE", "PRIVATE_IP", "SLURM_STATE", "REASON"],
                    &table_rows
                )
            );
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn topology(
    app: &App,
    partition: String,
    input: TopologyInputArg,
    kind: TopologyTypeArg,
    output: Option<PathBuf>,
    block_size: u32,
    min_block_size: Option<u32>,
    visualize: bool,
) -> Result<()> {
    let builder = TopologyBuilder::new(
        app.slurm.clone(),
        app.clock.clone(),
        partition,
        input.into(),
        kind.into(),
        block_size,
        min_block_size,
        &app.config.work_dir,
        output.clone(),
    );
    let content = builder.run().await?;
    if output.is_none() {
        print!("{}", content);
    }
    if visualize {
        let rendered = match TopologyType::from(kind) {
            TopologyType::Block => visualize_block(
                &content,
                min_block_size.unwrap_or(block_size),
                block_size.max(1),
            )?,
            TopologyType::Tree => visualize_tree(&content),
        };
        print!("{}", rendered);
    }
    Ok(())
}

/// Returns `true` when the loop ended on SIGINT.
pub async fn daemon(app: &App, interval: u64) -> Result<bool> {
    let keep_alive = KeepAliveFile::new(app.config.keep_alive_file.clone());
    let mut reconciler = Reconciler::new(app.slurm.clone(), app.fleet.clone(), keep_alive);
    let daemon = Daemon::new(
        Duration::from_secs(interval.max(1)),
        app.config.lock_file.clone(),
    );
    Ok(daemon.run(&mut reconciler).await?)
}
