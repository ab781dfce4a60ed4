//! Cluster resource types.
//!
//! The shapes follow the usual orchestrator object model: every object
//! carries [`ObjectMeta`] (name, namespace, labels, annotations, version,
//! creation time) plus a kind-specific spec and, where the cluster
//! reports back, a status.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kite_core::Labels;
use serde::{Deserialize, Serialize};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

pub fn epoch_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Metadata ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    /// When `name` is empty on create, the cluster derives a name from this prefix.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Bumped by the cluster on every write. Zero on objects not yet created.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl ObjectMeta {
    pub fn named(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn generated(namespace: &str, generate_name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            generate_name: generate_name.to_string(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Seconds since creation, relative to `now`.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        Duration::from_secs(now.saturating_sub(self.created_at))
    }
}

// ── Namespace ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    pub created_at: Timestamp,
}

// ── Ports and probes ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl ContainerPort {
    pub fn tcp(port: u16) -> Self {
        Self {
            container_port: port,
            protocol: Protocol::Tcp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeAction {
    TcpSocket { port: u16 },
    HttpGet { path: String, port: u16 },
}

/// A health check embedded in a container spec and run by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub action: ProbeAction,
    pub initial_delay: Duration,
    pub timeout: Duration,
}

impl Probe {
    pub fn tcp(port: u16, initial_delay: Duration, timeout: Duration) -> Self {
        Self {
            action: ProbeAction::TcpSocket { port },
            initial_delay,
            timeout,
        }
    }
}

/// CPU and memory quantities in the cluster's string notation (`"500m"`, `"1Gi"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub requests: ResourceList,
    pub limits: ResourceList,
}

// ── Pod template ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub labels: Labels,
    pub containers: Vec<Container>,
}

// ── Service ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionAffinity {
    #[default]
    None,
    ClientIp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Routing selector. Pods whose labels are a superset receive traffic.
    pub selector: Labels,
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub session_affinity: SessionAffinity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub meta: ObjectMeta,
    pub spec: ServiceSpec,
}

// ── ReplicaGroup ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroupSpec {
    pub replicas: u32,
    pub selector: Labels,
    pub template: PodTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroupStatus {
    /// Pods the cluster currently runs for this group.
    pub replicas: u32,
}

/// A named set of identically templated pods with a desired replica count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroup {
    pub meta: ObjectMeta,
    pub spec: ReplicaGroupSpec,
    #[serde(default)]
    pub status: ReplicaGroupStatus,
}

impl ReplicaGroup {
    pub fn has_desired_replicas(&self) -> bool {
        self.status.replicas == self.spec.replicas
    }
}

// ── Pod ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContainerState {
    Waiting { reason: String },
    Running { started_at: Timestamp },
    Terminated { exit_code: i32, reason: String },
}

impl ContainerState {
    /// Waiting reason reported for a container restarting in a loop.
    pub const CRASH_LOOP: &'static str = "CrashLoopBackOff";

    pub fn waiting(reason: &str) -> Self {
        ContainerState::Waiting {
            reason: reason.to_string(),
        }
    }

    pub fn running() -> Self {
        ContainerState::Running {
            started_at: epoch_secs(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running { .. })
    }

    pub fn is_crash_loop(&self) -> bool {
        matches!(self, ContainerState::Waiting { reason } if reason == Self::CRASH_LOOP)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerState,
    #[serde(default)]
    pub restart_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub meta: ObjectMeta,
    /// Name of the ReplicaGroup that owns this pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub containers: Vec<Container>,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    /// First port declared by the first container.
    pub fn first_port(&self) -> Option<&ContainerPort> {
        self.containers.first().and_then(|c| c.ports.first())
    }
}
