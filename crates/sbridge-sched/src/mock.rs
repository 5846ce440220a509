//! In-memory scheduler double. Answers the scontrol/sinfo subset this
//! system issues from a mutable node table, so the dispatcher and
//! reconciler tests can assert on resulting scheduler state without a
//! running control daemon.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sbridge_core::{CommandOutput, ExecError};

use crate::cli::{SlurmCli, SrunOptions};
use crate::error::SchedError;

#[derive(Debug, Clone)]
pub struct MockNode {
    pub name: String,
    /// Raw state expression, e.g. `idle+powered_down`.
    pub state: String,
    pub reason: String,
    pub node_addr: String,
    pub node_host_name: String,
    pub features: Vec<String>,
    pub partitions: Vec<String>,
}

impl MockNode {
    fn new(name: &str, partition: &str) -> Self {
        Self {
            name: name.to_string(),
            state: "idle".to_string(),
            reason: String::new(),
            node_addr: name.to_string(),
            node_host_name: name.to_string(),
            features: vec!["cloud".to_string()],
            partitions: vec![partition.to_string()],
        }
    }
}

type SrunHandler =
    Box<dyn Fn(&[String], &str) -> Result<CommandOutput, SchedError> + Send + Sync>;

#[derive(Default)]
struct MockState {
    nodes: Vec<MockNode>,
    suspend_exc: String,
    reconfigure_count: usize,
    updates: Vec<String>,
    reservations: HashMap<String, String>,
}

#[derive(Default)]
pub struct MockSlurm {
    state: Mutex<MockState>,
    srun_handlers: Mutex<Vec<(String, SrunHandler)>>,
}

impl MockSlurm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, name: &str, partition: &str) {
        self.state.lock().unwrap().nodes.push(MockNode::new(name, partition));
    }

    pub fn add_node_with(&self, node: MockNode) {
        self.state.lock().unwrap().nodes.push(node);
    }

    pub fn set_node_state(&self, name: &str, state: &str) {
        let mut guard = self.state.lock().unwrap();
        if let Some(node) = guard.nodes.iter_mut().find(|n| n.name == name) {
            node.state = state.to_ascii_lowercase();
        }
    }

    pub fn set_node_features(&self, name: &str, features: &[&str]) {
        let mut guard = self.state.lock().unwrap();
        if let Some(node) = guard.nodes.iter_mut().find(|n| n.name == name) {
            node.features = features.iter().map(|s| s.to_string()).collect();
        }
    }

    pub fn node(&self, name: &str) -> Option<MockNode> {
        self.state.lock().unwrap().nodes.iter().find(|n| n.name == name).cloned()
    }

    pub fn set_suspend_exc(&self, value: &str) {
        self.state.lock().unwrap().suspend_exc = value.to_string();
    }

    pub fn suspend_exc(&self) -> String {
        self.state.lock().unwrap().suspend_exc.clone()
    }

    /// Every `scontrol update …` issued so far, in order.
    pub fn updates(&self) -> Vec<String> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn update_count(&self) -> usize {
        self.state.lock().unwrap().updates.len()
    }

    pub fn reconfigure_count(&self) -> usize {
        self.state.lock().unwrap().reconfigure_count
    }

    pub fn has_reservation(&self, name: &str) -> bool {
        self.state.lock().unwrap().reservations.contains_key(name)
    }

    /// Register an srun handler selected by substring match on the
    /// command line. First match wins.
    pub fn on_srun<F>(&self, pattern: &str, handler: F)
    where
        F: Fn(&[String], &str) -> Result<CommandOutput, SchedError> + Send + Sync + 'static,
    {
        self.srun_handlers
            .lock()
            .unwrap()
            .push((pattern.to_string(), Box::new(handler)));
    }

    fn render_nodes(&self, filter: Option<&str>) -> String {
        let guard = self.state.lock().unwrap();
        let wanted: Option<Vec<&str>> = filter.map(|f| f.split(',').collect());
        let mut lines = Vec::new();
        for node in &guard.nodes {
            if let Some(wanted) = &wanted {
                if !wanted.contains(&node.name.as_str()) {
                    continue;
                }
            }
            let reason = if node.reason.is_empty() {
                String::new()
            } else {
                format!(" Reason={}", node.reason)
            };
            lines.push(format!(
                "NodeName={} State={} NodeAddr={} NodeHostName={} AvailableFeatures={} Partitions={}{}",
                node.name,
                node.state.to_ascii_uppercase(),
                node.node_addr,
                node.node_host_name,
                node.features.join(","),
                node.partitions.join(","),
                reason,
            ));
        }
        lines.join("\n")
    }

    fn apply_update(&self, args: &[String]) -> Result<(), SchedError> {
        let mut guard = self.state.lock().unwrap();
        guard.updates.push(args.join(" "));

        if let Some(value) = args.iter().find_map(|a| a.strip_prefix("SuspendExcNodes=")) {
            guard.suspend_exc =
                if value == "(null)" { String::new() } else { value.to_string() };
            return Ok(());
        }

        let name = args
            .iter()
            .find_map(|a| a.strip_prefix("NodeName="))
            .ok_or_else(|| SchedError::Parse("update without NodeName".into()))?
            .to_string();
        let node = guard
            .nodes
            .iter_mut()
            .find(|n| n.name == name)
            .ok_or_else(|| {
                SchedError::Exec(ExecError::CommandFailed {
                    program: "scontrol".into(),
                    status: 1,
                    stderr: format!("Invalid node name specified: {}", name),
                })
            })?;
        for assignment in args {
            if let Some((key, value)) = assignment.split_once('=') {
                match key {
                    "State" => node.state = value.to_ascii_lowercase(),
                    "Reason" => {
                        node.reason =
                            if value == "(null)" { String::new() } else { value.to_string() }
                    }
                    "NodeAddr" => node.node_addr = value.to_string(),
                    "NodeHostName" => node.node_host_name = value.to_string(),
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SlurmCli for MockSlurm {
    async fn scontrol(&self, args: &[String]) -> Result<String, SchedError> {
        let args_str: Vec<&str> = args.iter().map(String::as_str).collect();
        match args_str.as_slice() {
            ["ping"] => Ok("Slurmctld(primary) at localhost is UP".into()),
            ["show", "nodes"] => Ok(self.render_nodes(None)),
            ["show", "nodes", list] => Ok(self.render_nodes(Some(*list))),
            ["show", "hostlist", csv] => Ok(csv.to_string()),
            ["show", "hostnames", expr] => Ok(expr.replace(',', "\n")),
            ["show", "config"] => {
                let guard = self.state.lock().unwrap();
                let value = if guard.suspend_exc.is_empty() {
                    "(null)".to_string()
                } else {
                    guard.suspend_exc.clone()
                };
                Ok(format!(
                    "ClusterName              = mock\nSuspendExcNodes          = {}\nSuspendTime              = 300",
                    value
                ))
            }
            ["show", "reservation", name] => {
                let guard = self.state.lock().unwrap();
                match guard.reservations.get(*name) {
                    Some(nodes) => {
                        Ok(format!("ReservationName={} Nodes={}", name, nodes))
                    }
                    None => Err(SchedError::Exec(ExecError::CommandFailed {
                        program: "scontrol".into(),
                        status: 1,
                        stderr: format!("Reservation {} not found", name),
                    })),
                }
            }
            ["reconfigure"] => {
                self.state.lock().unwrap().reconfigure_count += 1;
                Ok(String::new())
            }
            ["create", "reservation", rest @ ..] => {
                let name = rest
                    .iter()
                    .find_map(|a| a.strip_prefix("ReservationName="))
                    .unwrap_or("")
                    .to_string();
                let nodes = rest
                    .iter()
                    .find_map(|a| a.strip_prefix("Nodes="))
                    .unwrap_or("")
                    .to_string();
                self.state.lock().unwrap().reservations.insert(name, nodes);
                Ok(String::new())
            }
            ["delete", spec] if spec.starts_with("ReservationName=") => {
                let name = spec.trim_start_matches("ReservationName=");
                self.state.lock().unwrap().reservations.remove(name);
                Ok(String::new())
            }
            ["update", ..] => {
                self.apply_update(&args[1..])?;
                Ok(String::new())
            }
            _ => Err(SchedError::Parse(format!("mock: unhandled scontrol {:?}", args))),
        }
    }

    async fn sinfo(&self, args: &[String]) -> Result<String, SchedError> {
        let partition = args
            .iter()
            .position(|a| a == "-p")
            .and_then(|i| args.get(i + 1))
            .cloned();
        let states: Option<Vec<String>> = args
            .iter()
            .position(|a| a == "-t")
            .and_then(|i| args.get(i + 1))
            .map(|s| s.split(',').map(|t| t.trim().to_string()).collect());
        let wants_partitions = args.iter().any(|a| a == "%P");

        let guard = self.state.lock().unwrap();
        if wants_partitions {
            let mut partitions = Vec::new();
            for node in &guard.nodes {
                for p in &node.partitions {
                    if !partitions.contains(p) {
                        partitions.push(p.clone());
                    }
                }
            }
            return Ok(partitions.join("\n"));
        }

        let mut names = Vec::new();
        for node in &guard.nodes {
            if let Some(p) = &partition {
                if !node.partitions.contains(p) {
                    continue;
                }
            }
            if let Some(states) = &states {
                let node_flags: Vec<&str> = node.state.split('+').collect();
                if !states.iter().any(|s| node_flags.contains(&s.as_str())) {
                    continue;
                }
            }
            names.push(node.name.clone());
        }
        Ok(names.join(","))
    }

    async fn srun(
        &self,
        hosts: &[String],
        command: &str,
        _opts: &SrunOptions,
    ) -> Result<CommandOutput, SchedError> {
        let handlers = self.srun_handlers.lock().unwrap();
        for (pattern, handler) in handlers.iter() {
            if command.contains(pattern.as_str()) {
                return handler(hosts, command);
            }
        }
        Ok(CommandOutput { status: 0, stdout: String::new(), stderr: String::new() })
    }
}
