//! Pod observer: container terminations, previous-termination evidence,
//! crash loops and last-chance snapshots on deletion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::node::NodeCache;
use super::Observer;
use crate::cluster::types::{ContainerStateTerminated, ContainerStatus, PodSpec};
use crate::cluster::{Pod, WatchEvent};
use crate::kernel::event::non_empty;
use crate::kernel::{
    CausalFact, ConfigReferences, CrashLoopPayload, EventType, EvidencePayload, FactPayload, ObjectSnapshot,
    PodState, ResourceList, SnapshotState, Stamp, Subject, TerminationPayload,
};
use crate::patterns::PatternId;
use crate::sink::JsonlSink;

/// Termination reason the kubelet reports for a kernel OOM kill.
pub const OOM_KILLED: &str = "OOMKilled";
pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";
pub const POD_DELETED: &str = "PodDeleted";

/// Identifies one termination so repeated notifications about it are
/// recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TerminationMarker {
    restart_count: i32,
    reason: String,
    exit_code: i32,
    finished_at: Option<DateTime<Utc>>,
}

impl TerminationMarker {
    fn of(restart_count: i32, term: &ContainerStateTerminated) -> Self {
        Self {
            restart_count,
            reason: term.reason.clone(),
            exit_code: term.exit_code,
            finished_at: term.finished_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SeenContainer {
    terminated: Option<TerminationMarker>,
    last_oom: Option<TerminationMarker>,
    crash_loop_restarts: Option<i32>,
}

impl SeenContainer {
    fn from_status(cs: &ContainerStatus) -> Self {
        Self {
            terminated: cs.state.terminated.as_ref().map(|t| TerminationMarker::of(cs.restart_count, t)),
            last_oom: cs
                .last_state
                .terminated
                .as_ref()
                .filter(|t| t.reason == OOM_KILLED)
                .map(|t| TerminationMarker::of(cs.restart_count, t)),
            crash_loop_restarts: cs
                .state
                .waiting
                .as_ref()
                .filter(|w| w.reason == CRASH_LOOP_BACK_OFF)
                .map(|_| cs.restart_count),
        }
    }

    /// State taken from a listing rather than a handled notification.
    fn listed(cs: &ContainerStatus) -> Self {
        Self { last_oom: None, ..Self::from_status(cs) }
    }
}

/// Names of every ConfigMap and Secret the pod spec pulls in through
/// `envFrom`, per-variable `valueFrom`, and mounted (or projected) volumes.
pub fn config_references(spec: &PodSpec) -> ConfigReferences {
    let mut refs = ConfigReferences::default();
    for c in &spec.containers {
        for ef in &c.env_from {
            if let Some(r) = &ef.config_map_ref {
                refs.configmaps.insert(r.name.clone());
            }
            if let Some(r) = &ef.secret_ref {
                refs.secrets.insert(r.name.clone());
            }
        }
        for env in &c.env {
            let Some(from) = &env.value_from else { continue };
            if let Some(r) = &from.config_map_key_ref {
                refs.configmaps.insert(r.name.clone());
            }
            if let Some(r) = &from.secret_key_ref {
                refs.secrets.insert(r.name.clone());
            }
        }
    }
    for vol in &spec.volumes {
        if let Some(r) = &vol.config_map {
            refs.configmaps.insert(r.name.clone());
        }
        if let Some(s) = &vol.secret {
            refs.secrets.insert(s.secret_name.clone());
        }
        if let Some(projected) = &vol.projected {
            for src in &projected.sources {
                if let Some(r) = &src.config_map {
                    refs.configmaps.insert(r.name.clone());
                }
                if let Some(r) = &src.secret {
                    refs.secrets.insert(r.name.clone());
                }
            }
        }
    }
    refs.configmaps.remove("");
    refs.secrets.remove("");
    refs
}

fn cpu_memory(list: &BTreeMap<String, String>) -> ResourceList {
    ["cpu", "memory"]
        .into_iter()
        .filter_map(|k| list.get(k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

fn container_limits(spec: &PodSpec, name: &str) -> ResourceList {
    spec.container(name).map(|c| cpu_memory(&c.resources.limits)).unwrap_or_default()
}

fn container_requests(spec: &PodSpec, name: &str) -> ResourceList {
    spec.container(name).map(|c| cpu_memory(&c.resources.requests)).unwrap_or_default()
}

fn pod_subject(pod: &Pod) -> Subject {
    Subject {
        pod_name: non_empty(&pod.metadata.name),
        namespace: non_empty(&pod.metadata.namespace),
        node_name: pod.spec.assigned_node().map(str::to_string),
        pod_uid: non_empty(&pod.metadata.uid),
    }
}

fn pod_key(pod: &Pod) -> String {
    if pod.metadata.uid.is_empty() {
        format!("{}/{}", pod.metadata.namespace, pod.metadata.name)
    } else {
        pod.metadata.uid.clone()
    }
}

pub struct PodObserver {
    nodes: NodeCache,
    sink: Arc<JsonlSink>,
    /// pod key -> container name -> what has already been reported.
    seen: HashMap<String, HashMap<String, SeenContainer>>,
}

impl PodObserver {
    pub fn new(nodes: NodeCache, sink: Arc<JsonlSink>) -> Self {
        Self { nodes, sink, seen: HashMap::new() }
    }

    /// Record the pod's current terminations and crash loops as known. A
    /// previous OOM kill in `lastState` is left unrecorded: it may have
    /// happened while nobody was watching, and the next Modified is the last
    /// chance to capture it.
    fn remember(&mut self, pod: &Pod) {
        let containers = pod
            .status
            .container_statuses
            .iter()
            .map(|cs| (cs.name.clone(), SeenContainer::listed(cs)))
            .collect();
        self.seen.insert(pod_key(pod), containers);
    }

    /// Each container is judged on its own; one pod can yield several facts.
    async fn inspect_containers(&mut self, pod: &Pod) {
        let key = pod_key(pod);
        for cs in &pod.status.container_statuses {
            let now = SeenContainer::from_status(cs);
            let before = self
                .seen
                .get(&key)
                .and_then(|containers| containers.get(&cs.name))
                .cloned()
                .unwrap_or_default();

            if let (Some(term), Some(marker)) = (&cs.state.terminated, &now.terminated) {
                if before.terminated.as_ref() != Some(marker) {
                    self.capture_termination(pod, cs, term).await;
                }
            }
            if let (Some(last), Some(marker)) = (&cs.last_state.terminated, &now.last_oom) {
                if before.last_oom.as_ref() != Some(marker) {
                    self.capture_evidence(pod, cs, last);
                }
            }
            if let Some(restarts) = now.crash_loop_restarts {
                if before.crash_loop_restarts != Some(restarts) {
                    self.capture_crash_loop(pod, cs);
                }
            }

            self.seen.entry(key.clone()).or_default().insert(cs.name.clone(), now);
        }
    }

    async fn capture_termination(&self, pod: &Pod, cs: &ContainerStatus, term: &ContainerStateTerminated) {
        // Read node context first: the pressure condition that explains the
        // kill may clear at any moment.
        let node_state = match pod.spec.assigned_node() {
            Some(node) => self.nodes.snapshot(node).await,
            None => None,
        };

        let is_oomkill = term.reason == OOM_KILLED;
        let (event_type, pattern_id) = if is_oomkill {
            (EventType::OomKill, Some(PatternId::OOM_KILL))
        } else {
            (EventType::ContainerTerminated, None)
        };
        let failure_duration_seconds = match (term.started_at, term.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };

        let stamp = Stamp::now();
        let payload = TerminationPayload {
            container_name: cs.name.clone(),
            image: cs.image.clone(),
            restart_count: cs.restart_count,
            reason: term.reason.clone(),
            exit_code: term.exit_code,
            message: term.message.clone(),
            started: term.started_at,
            finished: term.finished_at,
            failure_duration_seconds,
            pod_phase: pod.status.phase.clone(),
            node_name: pod.spec.assigned_node().map(str::to_string),
            qos_class: pod.status.qos_class.clone(),
            resource_limits: container_limits(&pod.spec, &cs.name),
            resource_requests: container_requests(&pod.spec, &cs.name),
            config_references: config_references(&pod.spec),
            node_state,
            is_oomkill,
            evidence_expires_at: stamp.evidence_expires_at(),
        };

        if is_oomkill {
            info!(
                pod = %pod.metadata.name,
                namespace = %pod.metadata.namespace,
                container = %cs.name,
                exit_code = term.exit_code,
                "OOMKill captured"
            );
        } else {
            debug!(pod = %pod.metadata.name, container = %cs.name, reason = %term.reason, "container terminated");
        }
        if payload.node_state.is_none() && pod.spec.assigned_node().is_some() {
            warn!(pod = %pod.metadata.name, "termination captured without node context");
        }

        let fact = CausalFact::new(
            stamp,
            event_type,
            pattern_id,
            pod_subject(pod),
            FactPayload::Termination(Box::new(payload)),
        );
        self.sink.emit(&fact);
    }

    /// `lastState` is the only trace of a kill once the current state has
    /// moved on, and it is overwritten on the next transition.
    fn capture_evidence(&self, pod: &Pod, cs: &ContainerStatus, last: &ContainerStateTerminated) {
        let fact = CausalFact::new(
            Stamp::now(),
            EventType::OomKillEvidence,
            Some(PatternId::OOM_KILL),
            pod_subject(pod),
            FactPayload::TerminationEvidence(EvidencePayload {
                container_name: cs.name.clone(),
                restart_count: cs.restart_count,
                last_reason: last.reason.clone(),
                last_exit_code: last.exit_code,
                last_started: last.started_at,
                last_finished: last.finished_at,
                evidence_source: "LastTerminationState",
                evidence_fragility: "high",
            }),
        );
        debug!(pod = %pod.metadata.name, container = %cs.name, "OOMKill evidence captured");
        self.sink.emit(&fact);
    }

    fn capture_crash_loop(&self, pod: &Pod, cs: &ContainerStatus) {
        let wait_reason = cs.state.waiting.as_ref().map(|w| w.reason.clone()).unwrap_or_default();
        let fact = CausalFact::new(
            Stamp::now(),
            EventType::CrashLoopBackOff,
            None,
            pod_subject(pod),
            FactPayload::CrashLoop(CrashLoopPayload {
                container_name: cs.name.clone(),
                restart_count: cs.restart_count,
                wait_reason,
                config_references: config_references(&pod.spec),
            }),
        );
        info!(pod = %pod.metadata.name, restarts = cs.restart_count, "CrashLoopBackOff");
        self.sink.emit(&fact);
    }

    /// Last chance to record full state before garbage collection.
    fn capture_deletion(&self, pod: &Pod) {
        let resource_limits = pod
            .spec
            .containers
            .iter()
            .map(|c| (c.name.clone(), cpu_memory(&c.resources.limits)))
            .collect();
        let state = PodState {
            uid: pod.metadata.uid.clone(),
            phase: pod.status.phase.clone(),
            node_name: pod.spec.assigned_node().map(str::to_string),
            pod_ip: pod.status.pod_ip.clone().filter(|ip| !ip.is_empty()),
            qos_class: pod.status.qos_class.clone(),
            restart_policy: pod.spec.restart_policy.clone(),
            resource_limits,
            config_references: config_references(&pod.spec),
            labels: pod.metadata.labels.clone(),
            annotations: pod.metadata.annotations.clone(),
        };
        let snapshot = ObjectSnapshot::new(
            Stamp::now(),
            "Pod",
            &pod.metadata.name,
            &pod.metadata.namespace,
            POD_DELETED,
            SnapshotState::Pod(Box::new(state)),
        );
        self.sink.emit_snapshot(&snapshot);
    }
}

#[async_trait]
impl Observer for PodObserver {
    type Resource = Pod;

    /// Seeds what has already been reported, so a re-list after reconnect
    /// does not replay old terminations.
    fn prime(&mut self, items: Vec<Pod>) {
        self.seen.clear();
        for pod in &items {
            self.remember(pod);
        }
    }

    async fn handle(&mut self, event: WatchEvent<Pod>) {
        match event {
            WatchEvent::Added(pod) => {
                if !self.seen.contains_key(&pod_key(&pod)) {
                    self.remember(&pod);
                }
            }
            WatchEvent::Modified(pod) => self.inspect_containers(&pod).await,
            WatchEvent::Deleted(pod) => {
                self.capture_deletion(&pod);
                self.seen.remove(&pod_key(&pod));
            }
        }
    }
}
