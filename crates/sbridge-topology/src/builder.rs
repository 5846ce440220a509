use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use sbridge_core::Clock;
use sbridge_sched::{SlurmClient, SrunOptions};
use tracing::{debug, info, warn};

use crate::error::TopologyError;
use crate::render::{render_block_topology, render_tree_topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyType {
    Tree,
    Block,
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyType::Tree => write!(f, "tree"),
            TopologyType::Block => write!(f, "block"),
        }
    }
}

impl FromStr for TopologyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tree" => Ok(TopologyType::Tree),
            "block" => Ok(TopologyType::Block),
            other => Err(format!("unknown topology type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyInput {
    Fabric,
    Nvlink,
}

impl fmt::Display for TopologyInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyInput::Fabric => write!(f, "fabric"),
            TopologyInput::Nvlink => write!(f, "nvlink"),
        }
    }
}

impl FromStr for TopologyInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fabric" => Ok(TopologyInput::Fabric),
            "nvlink" => Ok(TopologyInput::Nvlink),
            other => Err(format!("unknown topology input: {}", other)),
        }
    }
}

const NVLINK_QUERY: &str = "echo \"$(nvidia-smi -q | grep 'ClusterUUID' | head -n 1 | cut -d: -f2)$(nvidia-smi -q | grep 'CliqueId' | head -n 1 | cut -d: -f2)\" | while IFS= read -r line; do echo \"$(hostname): $line\"; done";

const GUID_QUERY: &str = "ibstatus | grep mlx5_ib | cut -d\" \" -f3 | xargs -I% ibstat \"%\" | grep \"Port GUID\" | cut -d: -f2 | while IFS= read -r line; do echo \"$(hostname): $line\"; done";

/// Builds the scheduler topology file for one partition from either the
/// InfiniBand fabric or the GPU fabric identifiers, running the probe
/// commands on the partition's own nodes.
pub struct TopologyBuilder {
    slurm: Arc<SlurmClient>,
    clock: Arc<dyn Clock>,
    partition: String,
    input: TopologyInput,
    kind: TopologyType,
    block_size: u32,
    min_block_size: u32,
    work_dir: PathBuf,
    output: Option<PathBuf>,
}

impl TopologyBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slurm: Arc<SlurmClient>,
        clock: Arc<dyn Clock>,
        partition: impl Into<String>,
        input: TopologyInput,
        kind: TopologyType,
        block_size: u32,
        min_block_size: Option<u32>,
        work_dir: impl Into<PathBuf>,
        output: Option<PathBuf>,
    ) -> Self {
        Self {
            slurm,
            clock,
            partition: partition.into(),
            input,
            kind,
            block_size,
            min_block_size: min_block_size.unwrap_or(block_size),
            work_dir: work_dir.into(),
            output,
        }
    }

    /// Build the topology and, when an output path is configured, write
    /// it atomically. Any failure aborts before the write, so an
    /// existing topology file is never left truncated.
    pub async fn run(&self) -> Result<String, TopologyError> {
        self.validate_partition().await?;
        let hosts = self.select_hosts().await?;

        let groups = match self.input {
            TopologyInput::Nvlink => self.collect_gpu_groups(&hosts).await?,
            TopologyInput::Fabric => self.collect_fabric_torsets(&hosts).await?,
        };

        let content = match self.kind {
            TopologyType::Block => {
                render_block_topology(&groups, self.min_block_size, self.block_size)?
            }
            TopologyType::Tree => render_tree_topology(&groups)?,
        };

        if let Some(path) = &self.output {
            write_atomic(path, &content)?;
            info!(path = %path.display(), "finished writing topology");
        }
        Ok(content)
    }

    async fn validate_partition(&self) -> Result<(), TopologyError> {
        let partitions = self.slurm.list_partitions().await?;
        if !partitions.iter().any(|p| p == &self.partition) {
            return Err(TopologyError::UnknownPartition(self.partition.clone()));
        }
        debug!(partition = %self.partition, "partition exists");
        Ok(())
    }

    /// Hosts in the partition that are powered on and idle. Building a
    /// topology needs at least two.
    async fn select_hosts(&self) -> Result<Vec<String>, TopologyError> {
        let all = self.slurm.partition_hostnames(&self.partition).await?;
        let down = self.slurm.unavailable_hostnames(&self.partition).await?;
        let hosts: Vec<String> =
            all.iter().filter(|h| !down.contains(h)).cloned().collect();
        if hosts.len() < all.len() {
            warn!(
                excluded = %down.join(","),
                "some nodes are not powered up and idle, running on a subset"
            );
        }
        debug!(hosts = %hosts.join(","), "selected hosts");
        if hosts.len() < 2 {
            return Err(TopologyError::NotEnoughHosts { available: hosts.len() });
        }
        Ok(hosts)
    }

    fn srun_opts(&self, gpus: Option<u32>) -> SrunOptions {
        SrunOptions {
            partition: Some(self.partition.clone()),
            gpus,
            timeout_minutes: 2,
            shell: true,
        }
    }

    async fn run_step(
        &self,
        step: &str,
        hosts: &[String],
        command: &str,
        gpus: Option<u32>,
    ) -> Result<String, TopologyError> {
        let output = self
            .slurm
            .srun(hosts, command, &self.srun_opts(gpus))
            .await?;
        if !output.success() {
            return Err(TopologyError::StepFailed {
                step: step.to_string(),
                host: hosts.join(","),
                detail: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    // ── NVLink/Block path ────────────────────────────────────────────────────

    /// Group hosts by (ClusterUUID, CliqueId), in host order.
    async fn collect_gpu_groups(
        &self,
        hosts: &[String],
    ) -> Result<Vec<(String, Vec<String>)>, TopologyError> {
        let stdout = self
            .run_step("gpu fabric query", hosts, NVLINK_QUERY, Some(hosts.len() as u32))
            .await?;

        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for line in stdout.lines() {
            let line = line.trim().trim_matches('"');
            let Some((host, group_id)) = line.split_once(':') else {
                continue;
            };
            let host = host.trim().to_string();
            let group_id = group_id.trim().to_string();
            match groups.iter_mut().find(|(id, _)| *id == group_id) {
                Some((_, members)) => members.push(host),
                None => groups.push((group_id, vec![host])),
            }
        }
        debug!(groups = groups.len(), "grouped hosts by gpu fabric");
        Ok(groups)
    }

    // ── Fabric/Tree path ─────────────────────────────────────────────────────

    async fn collect_fabric_torsets(
        &self,
        hosts: &[String],
    ) -> Result<Vec<(String, Vec<String>)>, TopologyError> {
        let sharp_path = self.resolve_sharp_path(hosts).await?;
        self.check_sharp_hello(hosts, &sharp_path).await?;
        self.check_ibstatus(hosts).await?;

        let guid_to_host = self.retrieve_guids(hosts).await?;

        let stamp = self.clock.now().format("%Y%m%d_%H%M%S");
        let out_dir = self.work_dir.join(".topology").join(format!("topology_output_{}", stamp));
        std::fs::create_dir_all(&out_dir).map_err(|e| TopologyError::Io {
            path: out_dir.display().to_string(),
            source: e,
        })?;
        let guids_file = out_dir.join("guids.txt");
        let topo_file = out_dir.join("topology.txt");

        let guid_list = guid_to_host
            .iter()
            .map(|(guid, _)| guid.clone())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&guids_file, guid_list + "\n").map_err(|e| TopologyError::Io {
            path: guids_file.display().to_string(),
            source: e,
        })?;

        self.generate_topo_file(hosts, &sharp_path, &guids_file, &topo_file)
            .await?;
        debug!(path = %topo_file.display(), "fabric topology file generated");

        let guids_per_switch = read_switch_guids(&topo_file)?;
        Ok(identify_torsets(&guids_per_switch, &guid_to_host))
    }

    async fn resolve_sharp_path(&self, hosts: &[String]) -> Result<String, TopologyError> {
        if let Ok(path) = std::env::var("SHARP_CMD") {
            return Ok(path);
        }
        let stdout = self
            .run_step(
                "os probe",
                &hosts[..1],
                "grep '^ID=' /etc/os-release | cut -d'=' -f2",
                None,
            )
            .await?;
        let os_id = stdout.trim().trim_matches('"').to_string();
        debug!(host = %hosts[0], os_id, "detected operating system");
        match os_id.as_str() {
            "ubuntu" => Ok("/opt/hpcx-v2.18-gcc-mlnx_ofed-ubuntu22.04-cuda12-x86_64/".into()),
            "almalinux" => Ok("/opt/hpcx-v2.18-gcc-mlnx_ofed-redhat8-cuda12-x86_64/".into()),
            other => Err(TopologyError::UnsupportedOs(other.to_string())),
        }
    }

    /// `sharp_hello` failing means the fabric manager is unreachable.
    async fn check_sharp_hello(
        &self,
        hosts: &[String],
        sharp_path: &str,
    ) -> Result<(), TopologyError> {
        let command = format!("{}sharp/bin/sharp_hello", sharp_path);
        let output = self
            .slurm
            .srun(&hosts[..1], &command, &self.srun_opts(None))
            .await?;
        if !output.success() {
            return Err(TopologyError::SharpUnavailable(output.stderr.trim().to_string()));
        }
        debug!("sharp_hello passed");
        Ok(())
    }

    async fn check_ibstatus(&self, hosts: &[String]) -> Result<(), TopologyError> {
        let stdout = self
            .run_step("ibstatus probe", &hosts[..1], "command -v ibstatus", None)
            .await?;
        if stdout.trim().is_empty() || stdout.trim() == "None" {
            return Err(TopologyError::MissingIbstatus(hosts[0].clone()));
        }
        Ok(())
    }

    /// Query every IB port GUID, normalized to the form the fabric tool
    /// reports (`0x00ab…` becomes `0xab…`). Returned in output order.
    async fn retrieve_guids(
        &self,
        hosts: &[String],
    ) -> Result<Vec<(String, String)>, TopologyError> {
        let stdout = self.run_step("guid harvest", hosts, GUID_QUERY, None).await?;
        let mut guid_to_host = Vec::new();
        for line in stdout.lines() {
            let Some((host, guid)) = line.split_once(':') else {
                continue;
            };
            let guid = guid.trim().replace("0x00", "0x");
            guid_to_host.push((guid, host.trim().to_string()));
        }
        Ok(guid_to_host)
    }

    async fn generate_topo_file(
        &self,
        hosts: &[String],
        sharp_path: &str,
        guids_file: &Path,
        topo_file: &Path,
    ) -> Result<(), TopologyError> {
        let command = format!(
            "SHARP_SMX_UCX_INTERFACE=mlx5_ib0:1 {}sharp/bin/sharp_cmd topology --ib-dev mlx5_ib0:1 --guids_file {} --topology_file {}",
            sharp_path,
            guids_file.display(),
            topo_file.display()
        );
        self.run_step("fabric topology generation", &hosts[..1], &command, None)
            .await?;
        Ok(())
    }
}

/// Pull the per-switch GUID lists out of the fabric tool's output file
/// (`SwitchName=ibsw2 Nodes=0x…,0x…` lines).
fn read_switch_guids(topo_file: &Path) -> Result<Vec<String>, TopologyError> {
    let content = std::fs::read_to_string(topo_file).map_err(|e| TopologyError::Io {
        path: topo_file.display().to_string(),
        source: e,
    })?;
    Ok(content
        .lines()
        .filter(|line| line.contains("Nodes="))
        .filter_map(|line| {
            line.trim()
                .split(' ')
                .nth(1)
                .and_then(|field| field.split('=').nth(1))
                .map(String::from)
        })
        .collect())
}

/// Assign each host a torset from its switch membership, then invert to
/// `(torset, hosts)` groups in first-seen order.
fn identify_torsets(
    guids_per_switch: &[String],
    guid_to_host: &[(String, String)],
) -> Vec<(String, Vec<String>)> {
    let lookup: HashMap<&str, &str> = guid_to_host
        .iter()
        .map(|(guid, host)| (guid.as_str(), host.as_str()))
        .collect();

    let mut host_to_torset: Vec<(String, String)> = Vec::new();
    for device_guids in guids_per_switch {
        let torset_index = {
            let mut torsets: Vec<&str> =
                host_to_torset.iter().map(|(_, t)| t.as_str()).collect();
            torsets.sort_unstable();
            torsets.dedup();
            torsets.len()
        };
        for guid in device_guids.split(',') {
            let Some(host) = lookup.get(guid.trim()) else {
                continue;
            };
            if host_to_torset.iter().any(|(h, _)| h == host) {
                continue;
            }
            host_to_torset.push((host.to_string(), format!("torset-{:02}", torset_index)));
        }
    }

    let mut torsets: Vec<(String, Vec<String>)> = Vec::new();
    for (host, torset) in host_to_torset {
        match torsets.iter_mut().find(|(t, _)| *t == torset) {
            Some((_, hosts)) => hosts.push(host),
            None => torsets.push((torset, vec![host])),
        }
    }
    torsets
}

/// Write via a temp file in the same directory plus rename, so readers
/// never observe a partial file.
fn write_atomic(path: &Path, content: &str) -> Result<(), TopologyError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| TopologyError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).map_err(|e| TopologyError::Io {
        path: tmp.display().to_string(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| TopologyError::Io {
        path: path.display().to_string(),
        source: e,
    })
}
