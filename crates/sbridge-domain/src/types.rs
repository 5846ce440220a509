use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Reason sentinels ─────────────────────────────────────────────────────────

/// Well-known values written to the scheduler's per-node `Reason` field.
pub mod reasons {
    pub const NO_NODE: &str = "cyclecloud_no_node";
    pub const ZOMBIE_NODE: &str = "cyclecloud_zombie_node";
    pub const NODE_FAILURE: &str = "cyclecloud_node_failure";
    pub const NODE_RECOVERY: &str = "cyclecloud_node_recovery";
}

// ── Provider-side states ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Off,
    Acquiring,
    Preparing,
    Starting,
    Ready,
    Deallocated,
    Failed,
    Terminating,
    Unavailable,
}

impl NodeState {
    /// States a resume request may be issued from.
    pub fn is_resumable(&self) -> bool {
        matches!(self, NodeState::Off | NodeState::Deallocated)
    }

    pub fn is_booting(&self) -> bool {
        matches!(
            self,
            NodeState::Acquiring | NodeState::Preparing | NodeState::Starting
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Off => "Off",
            NodeState::Acquiring => "Acquiring",
            NodeState::Preparing => "Preparing",
            NodeState::Starting => "Starting",
            NodeState::Ready => "Ready",
            NodeState::Deallocated => "Deallocated",
            NodeState::Failed => "Failed",
            NodeState::Terminating => "Terminating",
            NodeState::Unavailable => "Unavailable",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    Started,
    Terminated,
    Deallocated,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetState::Started => "Started",
            TargetState::Terminated => "Terminated",
            TargetState::Deallocated => "Deallocated",
        };
        write!(f, "{}", s)
    }
}

// ── Scheduler-side state flags ───────────────────────────────────────────────

/// Closed set of scheduler node state tokens. A node has one base state
/// plus independent flags; both parse into the same set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateFlag {
    Idle,
    Allocated,
    Mixed,
    Drain,
    Draining,
    Drained,
    Down,
    Fail,
    PoweredDown,
    PoweringDown,
    PoweredUp,
    PoweringUp,
    Reserved,
    Completing,
    Maint,
    Perfctrs,
    NotResponding,
}

impl StateFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateFlag::Idle => "idle",
            StateFlag::Allocated => "allocated",
            StateFlag::Mixed => "mixed",
            StateFlag::Drain => "drain",
            StateFlag::Draining => "draining",
            StateFlag::Drained => "drained",
            StateFlag::Down => "down",
            StateFlag::Fail => "fail",
            StateFlag::PoweredDown => "powered_down",
            StateFlag::PoweringDown => "powering_down",
            StateFlag::PoweredUp => "powered_up",
            StateFlag::PoweringUp => "powering_up",
            StateFlag::Reserved => "reserved",
            StateFlag::Completing => "completing",
            StateFlag::Maint => "maint",
            StateFlag::Perfctrs => "perfctrs",
            StateFlag::NotResponding => "not_responding",
        }
    }
}

impl FromStr for StateFlag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Slurm also appends tokens like "cloud" and trailing markers
        // ("idle~", "down*"); strip markers and ignore unknown tokens.
        let token = s.trim().trim_end_matches(['*', '~', '#', '%', '!']);
        match token.to_ascii_lowercase().as_str() {
            "idle" => Ok(StateFlag::Idle),
            "alloc" | "allocated" => Ok(StateFlag::Allocated),
            "mixed" => Ok(StateFlag::Mixed),
            "drain" => Ok(StateFlag::Drain),
            "draining" => Ok(StateFlag::Draining),
            "drained" => Ok(StateFlag::Drained),
            "down" => Ok(StateFlag::Down),
            "fail" => Ok(StateFlag::Fail),
            "powered_down" => Ok(StateFlag::PoweredDown),
            "powering_down" => Ok(StateFlag::PoweringDown),
            "powered_up" => Ok(StateFlag::PoweredUp),
            "powering_up" => Ok(StateFlag::PoweringUp),
            "reserved" => Ok(StateFlag::Reserved),
            "completing" => Ok(StateFlag::Completing),
            "maint" => Ok(StateFlag::Maint),
            "perfctrs" => Ok(StateFlag::Perfctrs),
            "not_responding" | "no_respond" => Ok(StateFlag::NotResponding),
            _ => Err(()),
        }
    }
}

/// Set of [`StateFlag`]s parsed once from a scheduler `State=` expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFlags(BTreeSet<StateFlag>);

impl StateFlags {
    pub fn new(flags: impl IntoIterator<Item = StateFlag>) -> Self {
        Self(flags.into_iter().collect())
    }

    /// Parse an expression like `IDLE+CLOUD+POWERED_DOWN`. Unknown
    /// tokens (e.g. `CLOUD`, `DYNAMIC_NORM`) are ignored.
    pub fn parse(expr: &str) -> Self {
        Self(
            expr.split('+')
                .filter_map(|tok| tok.parse::<StateFlag>().ok())
                .collect(),
        )
    }

    pub fn contains(&self, flag: StateFlag) -> bool {
        self.0.contains(&flag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateFlag> {
        self.0.iter()
    }

    pub fn is_idle(&self) -> bool {
        self.contains(StateFlag::Idle)
    }

    pub fn is_down(&self) -> bool {
        self.contains(StateFlag::Down)
    }

    pub fn is_powered_down(&self) -> bool {
        self.contains(StateFlag::PoweredDown)
    }

    pub fn is_powering_down(&self) -> bool {
        self.contains(StateFlag::PoweringDown)
    }

    pub fn is_powering_up(&self) -> bool {
        self.contains(StateFlag::PoweringUp)
    }

    /// A node has joined the cluster when it is in none of the
    /// power-save states.
    pub fn is_joined(&self) -> bool {
        !(self.contains(StateFlag::PoweredDown)
            || self.contains(StateFlag::PoweringDown)
            || self.contains(StateFlag::PoweringUp))
    }
}

impl fmt::Display for StateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in &self.0 {
            if !first {
                write!(f, "+")?;
            }
            first = false;
            write!(f, "{}", flag.as_str())?;
        }
        Ok(())
    }
}

// ── Software configuration bag ───────────────────────────────────────────────

/// Opaque key/value configuration attached to provider nodes and
/// buckets. Typed getters cover the keys this system consumes; anything
/// else passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoftwareConfig(pub Map<String, Value>);

impl SoftwareConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
            _ => None,
        }
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn use_nodename_as_hostname(&self) -> bool {
        self.get_bool("use_nodename_as_hostname").unwrap_or(false)
    }

    pub fn standalone_dns_enabled(&self) -> bool {
        self.get_bool("standalone_dns_enabled").unwrap_or(false)
    }

    pub fn node_prefix(&self) -> Option<&str> {
        self.get_str("node_prefix").filter(|s| !s.is_empty())
    }

    pub fn dynamic_config(&self) -> Option<&str> {
        self.get_str("dynamic_config")
    }

    /// None means the key is absent, which callers warn about.
    pub fn autoscale(&self) -> Option<bool> {
        self.0.get("autoscale").map(|v| match v {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => true,
        })
    }

    pub fn is_hpc(&self) -> bool {
        self.get_bool("hpc").unwrap_or(true)
    }

    pub fn partition_name(&self) -> Option<&str> {
        self.get_str("partition")
    }

    pub fn is_default_partition(&self) -> bool {
        self.get_bool("default_partition").unwrap_or(false)
    }
}

// ── Node records ─────────────────────────────────────────────────────────────

/// A node as the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderNode {
    pub name: String,
    pub node_array: String,
    pub vm_size: String,
    #[serde(default)]
    pub placement_group: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    pub state: NodeState,
    pub target_state: TargetState,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default)]
    pub software_configuration: SoftwareConfig,
}

/// A node as the scheduler reports it, parsed once at the CLI adapter
/// boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerNode {
    pub name: String,
    pub state: StateFlags,
    pub reason: String,
    pub node_addr: Option<String>,
    pub node_host_name: Option<String>,
    pub features: Vec<String>,
    pub partitions: Vec<String>,
}

impl SchedulerNode {
    /// NodeAddr defaults to the node name when unset.
    pub fn node_addr(&self) -> &str {
        self.node_addr.as_deref().unwrap_or(&self.name)
    }

    pub fn node_host_name(&self) -> &str {
        self.node_host_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_joined(&self) -> bool {
        self.state.is_joined()
    }

    /// True when this system marked the node down (missing or zombie).
    pub fn is_down_by_bridge(&self) -> bool {
        self.state.is_down()
            && (self.reason == reasons::NO_NODE || self.reason == reasons::ZOMBIE_NODE)
    }

    pub fn has_zombie_reason(&self) -> bool {
        self.reason == reasons::ZOMBIE_NODE
    }

    /// Lowercased, sorted feature key used to match dynamic partitions.
    pub fn feature_key(&self) -> String {
        let mut features: Vec<String> = self
            .features
            .iter()
            .map(|f| f.trim().to_ascii_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        features.sort();
        features.dedup();
        features.join(",")
    }
}
