//! Structured payload shapes, one per fact kind.
//!
//! Internally every payload is a typed record. They only become the open
//! key/value `payload` object when serialized, which keeps the wire format
//! flexible for the downstream store while the observers stay checked.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::patterns::PatternId;

/// Opaque quantity strings keyed by resource name ("cpu", "memory").
pub type ResourceList = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FactPayload {
    Termination(Box<TerminationPayload>),
    TerminationEvidence(EvidencePayload),
    CrashLoop(CrashLoopPayload),
    NodePressure(NodePressurePayload),
    ConfigChange(ConfigChangePayload),
}

impl FactPayload {
    pub fn as_termination(&self) -> Option<&TerminationPayload> {
        match self {
            FactPayload::Termination(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_config_change(&self) -> Option<&ConfigChangePayload> {
        match self {
            FactPayload::ConfigChange(c) => Some(c),
            _ => None,
        }
    }
}

/// Names of configuration objects a pod pulls in, deduplicated and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigReferences {
    pub configmaps: BTreeSet<String>,
    pub secrets: BTreeSet<String>,
}

/// Derived view of one node's pressure and capacity at capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeContextSnapshot {
    pub node_name: String,
    pub snapshot_time: DateTime<Utc>,
    pub conditions: BTreeMap<String, String>,
    pub memory_pressure: bool,
    pub disk_pressure: bool,
    pub pid_pressure: bool,
    pub allocatable_cpu: Option<String>,
    pub allocatable_memory: Option<String>,
    pub capacity_cpu: Option<String>,
    pub capacity_memory: Option<String>,
    pub kernel_version: String,
    pub kubelet_version: String,
    pub container_runtime: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminationPayload {
    pub container_name: String,
    pub image: String,
    pub restart_count: i32,
    pub reason: String,
    pub exit_code: i32,
    pub message: Option<String>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub failure_duration_seconds: Option<f64>,
    pub pod_phase: String,
    pub node_name: Option<String>,
    pub qos_class: String,
    pub resource_limits: ResourceList,
    pub resource_requests: ResourceList,
    pub config_references: ConfigReferences,
    pub node_state: Option<NodeContextSnapshot>,
    pub is_oomkill: bool,
    /// When the platform is expected to have rotated the evidence away.
    pub evidence_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidencePayload {
    pub container_name: String,
    pub restart_count: i32,
    pub last_reason: String,
    pub last_exit_code: i32,
    pub last_started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub evidence_source: &'static str,
    pub evidence_fragility: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrashLoopPayload {
    pub container_name: String,
    pub restart_count: i32,
    pub wait_reason: String,
    pub config_references: ConfigReferences,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodePressurePayload {
    pub node_snapshot: NodeContextSnapshot,
    pub pressure_active: bool,
}

/// Deliberately carries digests and key names only, never config values.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigChangePayload {
    pub configmap_name: String,
    pub namespace: String,
    pub resource_version: String,
    pub old_content_hash: String,
    pub new_content_hash: String,
    pub changed_keys: Vec<String>,
    pub key_count: usize,
    pub event_type: &'static str,
    pub potential_patterns: Vec<PatternId>,
    pub content_captured: bool,
}

/// Full pod state preserved at deletion.
#[derive(Debug, Clone, Serialize)]
pub struct PodState {
    pub uid: String,
    pub phase: String,
    pub node_name: Option<String>,
    pub pod_ip: Option<String>,
    pub qos_class: String,
    pub restart_policy: Option<String>,
    pub resource_limits: BTreeMap<String, ResourceList>,
    pub config_references: ConfigReferences,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SnapshotState {
    Pod(Box<PodState>),
}
