use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

use super::payload::{FactPayload, SnapshotState};
use super::time::{RecordId, Stamp};
use crate::patterns::PatternId;

/// Event-type tag carried by every fact. Open on the wire: anything the
/// catalog does not name travels as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    NodeMemoryPressure,
    OomKill,
    OomKillEvidence,
    ContainerTerminated,
    CrashLoopBackOff,
    ConfigMapChanged,
    PodNotRestarted,
    KubeletSync,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::NodeMemoryPressure => "NodeMemoryPressure",
            EventType::OomKill => "OOMKill",
            EventType::OomKillEvidence => "OOMKillEvidence",
            EventType::ContainerTerminated => "ContainerTerminated",
            EventType::CrashLoopBackOff => "CrashLoopBackOff",
            EventType::ConfigMapChanged => "ConfigMapChanged",
            EventType::PodNotRestarted => "PodNotRestarted",
            EventType::KubeletSync => "KubeletSync",
            EventType::Other(s) => s,
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "NodeMemoryPressure" => EventType::NodeMemoryPressure,
            "OOMKill" => EventType::OomKill,
            "OOMKillEvidence" => EventType::OomKillEvidence,
            "ContainerTerminated" => EventType::ContainerTerminated,
            "CrashLoopBackOff" => EventType::CrashLoopBackOff,
            "ConfigMapChanged" => EventType::ConfigMapChanged,
            "PodNotRestarted" => EventType::PodNotRestarted,
            "KubeletSync" => EventType::KubeletSync,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Which workload a fact is about. Every coordinate is optional; a config
/// change only knows its namespace, a node fact only its node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Subject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_uid: Option<String>,
}

impl Subject {
    pub fn node(name: &str) -> Self {
        Self { node_name: Some(name.to_string()), ..Default::default() }
    }

    pub fn namespace(ns: &str) -> Self {
        Self { namespace: non_empty(ns), ..Default::default() }
    }
}

pub(crate) fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// The atomic unit of memory. Immutable once built: fields are private and
/// the payload holds plain data only.
#[derive(Debug, Clone, Serialize)]
pub struct CausalFact {
    id: RecordId,
    timestamp: DateTime<Utc>,
    event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pattern_id: Option<PatternId>,
    #[serde(flatten)]
    subject: Subject,
    payload: FactPayload,
}

impl CausalFact {
    pub fn new(
        stamp: Stamp,
        event_type: EventType,
        pattern_id: Option<PatternId>,
        subject: Subject,
        payload: FactPayload,
    ) -> Self {
        Self {
            id: stamp.id,
            timestamp: stamp.at,
            event_type,
            pattern_id,
            subject,
            payload,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn pattern_id(&self) -> Option<PatternId> {
        self.pattern_id
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn payload(&self) -> &FactPayload {
        &self.payload
    }
}

/// Full point-in-time capture of one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectSnapshot {
    id: RecordId,
    timestamp: DateTime<Utc>,
    object_kind: &'static str,
    object_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    trigger_event: String,
    state: SnapshotState,
}

impl ObjectSnapshot {
    pub fn new(
        stamp: Stamp,
        object_kind: &'static str,
        object_name: &str,
        namespace: &str,
        trigger_event: &str,
        state: SnapshotState,
    ) -> Self {
        Self {
            id: stamp.id,
            timestamp: stamp.at,
            object_kind,
            object_name: object_name.to_string(),
            namespace: non_empty(namespace),
            trigger_event: trigger_event.to_string(),
            state,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn object_kind(&self) -> &str {
        self.object_kind
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn trigger_event(&self) -> &str {
        &self.trigger_event
    }

    pub fn state(&self) -> &SnapshotState {
        &self.state
    }
}
