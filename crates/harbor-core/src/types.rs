//! Shared data model: isolation levels, lifecycle status and the resource,
//! network and storage descriptors attached to every sandbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Mechanism backing a sandbox, in order of increasing isolation and overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// Process-level isolation (low overhead)
    #[default]
    Process,
    /// Container-level isolation
    Container,
    /// VM-level isolation
    Vm,
}

impl IsolationLevel {
    /// All levels, lowest overhead first.
    pub const ALL: [IsolationLevel; 3] = [Self::Process, Self::Container, Self::Vm];

    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "process" => Some(Self::Process),
            "container" => Some(Self::Container),
            "vm" => Some(Self::Vm),
            _ => None,
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Container => write!(f, "container"),
            Self::Vm => write!(f, "vm"),
        }
    }
}

/// Lifecycle status of a sandbox.
///
/// ```text
/// Creating ──▶ Running ◀──▶ Paused
///    │            │           │
///    ▼            ▼           ▼
///  Failed     Hibernated ──▶ Resuming ──▶ Running
///
/// any non-terminal ──▶ Terminating ──▶ Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// Storage and backend are being set up.
    Creating,
    /// Ready for work.
    Running,
    /// Suspended, resources retained.
    Paused,
    /// Deep sleep, state persisted and resources released.
    Hibernated,
    /// Restoring persisted state.
    Resuming,
    /// Final state being persisted.
    Terminating,
    /// Gone for good.
    Terminated,
    /// Construction failed.
    Failed,
}

impl SandboxStatus {
    /// `Terminated` and `Failed` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Hibernated => "hibernated",
            Self::Resuming => "resuming",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Resource limits for a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU cores (default: 1.0).
    pub cpu_cores: f64,
    /// Memory in GB (default: 2.0).
    pub memory_gb: f64,
    /// Storage in GB (default: 10.0).
    pub storage_gb: f64,
    /// Maximum number of processes (default: 100).
    pub max_processes: u32,
    /// Optional network bandwidth cap in Mbps.
    pub network_bandwidth_mbps: Option<f64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_cores: 1.0,
            memory_gb: 2.0,
            storage_gb: 10.0,
            max_processes: 100,
            network_bandwidth_mbps: None,
        }
    }
}

/// Network policy for a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Whether the sandbox sits on an isolated network (default: true).
    pub isolated: bool,
    /// Stable hostname, filled in from the sandbox ID at construction.
    pub stable_hostname: Option<String>,
    /// Allowed external destinations.
    pub allowed_egress: Vec<String>,
    /// Ports exposed to the host.
    pub expose_ports: Vec<u16>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            isolated: true,
            stable_hostname: None,
            allowed_egress: Vec::new(),
            expose_ports: Vec::new(),
        }
    }
}

/// Idle/lifetime policy for a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// Minutes without activity before the sandbox counts as idle (default: 30).
    pub idle_timeout_minutes: u32,
    /// Hours after creation before the sandbox counts as expired (default: 24).
    pub max_lifetime_hours: u32,
    /// Resume automatically on demand (default: true).
    pub auto_resume: bool,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 30,
            max_lifetime_hours: 24,
            auto_resume: true,
        }
    }
}

/// Snapshot policy applied on hibernation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPolicy {
    /// Write a historical snapshot on hibernate (default: false).
    pub enabled: bool,
    /// Nominal snapshot interval in minutes (default: 60).
    pub interval_minutes: u32,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 60,
        }
    }
}

/// Persistent storage descriptor of a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentStorage {
    /// Location of the sandbox's blob namespace.
    pub path: PathBuf,
    /// Snapshot policy.
    pub snapshot: SnapshotPolicy,
}
