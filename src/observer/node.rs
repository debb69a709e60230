use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::Observer;
use crate::cluster::{Node, ResourceApi, WatchEvent};
use crate::error::ClusterError;
use crate::kernel::{CausalFact, EventType, FactPayload, NodeContextSnapshot, NodePressurePayload, Stamp, Subject};
use crate::patterns::PatternId;
use crate::sink::JsonlSink;

const MEMORY_PRESSURE: &str = "MemoryPressure";
const DISK_PRESSURE: &str = "DiskPressure";
const PID_PRESSURE: &str = "PIDPressure";

/// Derive the pressure/capacity view of `node` as of now.
pub fn build_snapshot(node: &Node) -> NodeContextSnapshot {
    let status = &node.status;
    let conditions: std::collections::BTreeMap<String, String> = status
        .conditions
        .iter()
        .map(|c| (c.type_.clone(), c.status.clone()))
        .collect();
    let active = |name: &str| conditions.get(name).is_some_and(|s| s == "True");

    NodeContextSnapshot {
        node_name: node.metadata.name.clone(),
        snapshot_time: Utc::now(),
        memory_pressure: active(MEMORY_PRESSURE),
        disk_pressure: active(DISK_PRESSURE),
        pid_pressure: active(PID_PRESSURE),
        allocatable_cpu: status.allocatable.get("cpu").cloned(),
        allocatable_memory: status.allocatable.get("memory").cloned(),
        capacity_cpu: status.capacity.get("cpu").cloned(),
        capacity_memory: status.capacity.get("memory").cloned(),
        kernel_version: status.node_info.kernel_version.clone(),
        kubelet_version: status.node_info.kubelet_version.clone(),
        container_runtime: status.node_info.container_runtime_version.clone(),
        conditions,
    }
}

/// Last-seen node objects, keyed by name.
///
/// Cloning shares the same cache. Readers only ever get an owned
/// [`NodeContextSnapshot`]; no reference into the map escapes the lock.
#[derive(Clone)]
pub struct NodeCache {
    inner: Arc<NodeCacheInner>,
}

struct NodeCacheInner {
    nodes: RwLock<HashMap<String, Node>>,
    api: Arc<dyn ResourceApi<Node>>,
    lookup_timeout: Duration,
}

impl NodeCache {
    pub fn new(api: Arc<dyn ResourceApi<Node>>, lookup_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(NodeCacheInner {
                nodes: RwLock::new(HashMap::new()),
                api,
                lookup_timeout,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Node>> {
        self.inner.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Node>> {
        self.inner.nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of a cached node, without touching the API.
    pub fn cached_snapshot(&self, name: &str) -> Option<NodeContextSnapshot> {
        self.read().get(name).map(build_snapshot)
    }

    /// Snapshot `name`, falling back to a point lookup on a cache miss. The
    /// lookup is bounded by the configured timeout; any failure yields
    /// `None` rather than an error so the caller's fact still goes out.
    pub async fn snapshot(&self, name: &str) -> Option<NodeContextSnapshot> {
        if name.is_empty() {
            return None;
        }
        if let Some(snapshot) = self.cached_snapshot(name) {
            return Some(snapshot);
        }

        let timeout = self.inner.lookup_timeout;
        let looked_up = match tokio::time::timeout(timeout, self.inner.api.get(name)).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::LookupTimeout { kind: "Node", name: name.to_string(), timeout }),
        };
        match looked_up {
            Ok(Some(node)) => {
                let snapshot = build_snapshot(&node);
                self.write().insert(name.to_string(), node);
                Some(snapshot)
            }
            Ok(None) => {
                debug!(node = name, "node not found during enrichment");
                None
            }
            Err(e) => {
                warn!(node = name, error = %e, "node enrichment lookup failed");
                None
            }
        }
    }

    /// Insert or replace; true if the node was already known.
    fn upsert(&self, node: Node) -> bool {
        self.write().insert(node.metadata.name.clone(), node).is_some()
    }

    fn remove(&self, name: &str) {
        self.write().remove(name);
    }

    fn replace_all(&self, nodes: Vec<Node>) {
        let fresh: HashMap<String, Node> = nodes.into_iter().map(|n| (n.metadata.name.clone(), n)).collect();
        *self.write() = fresh;
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Keeps the node cache current and reports memory pressure.
pub struct NodeObserver {
    cache: NodeCache,
    sink: Arc<JsonlSink>,
}

impl NodeObserver {
    pub fn new(cache: NodeCache, sink: Arc<JsonlSink>) -> Self {
        Self { cache, sink }
    }

    /// Handle for sibling observers that need node context.
    pub fn cache(&self) -> NodeCache {
        self.cache.clone()
    }

    fn report_pressure(&self, snapshot: NodeContextSnapshot) {
        let subject = Subject::node(&snapshot.node_name);
        info!(node = %snapshot.node_name, "memory pressure active");
        let fact = CausalFact::new(
            Stamp::now(),
            EventType::NodeMemoryPressure,
            Some(PatternId::OOM_KILL),
            subject,
            FactPayload::NodePressure(NodePressurePayload { node_snapshot: snapshot, pressure_active: true }),
        );
        self.sink.emit(&fact);
    }
}

#[async_trait]
impl Observer for NodeObserver {
    type Resource = Node;

    fn prime(&mut self, items: Vec<Node>) {
        self.cache.replace_all(items);
    }

    async fn handle(&mut self, event: WatchEvent<Node>) {
        match event {
            WatchEvent::Added(node) => {
                let snapshot = build_snapshot(&node);
                // A re-listed node we already know is not news.
                let known = self.cache.upsert(node);
                if !known && snapshot.memory_pressure {
                    self.report_pressure(snapshot);
                }
            }
            WatchEvent::Modified(node) => {
                let snapshot = build_snapshot(&node);
                self.cache.upsert(node);
                if snapshot.memory_pressure {
                    self.report_pressure(snapshot);
                }
            }
            WatchEvent::Deleted(node) => {
                debug!(node = %node.metadata.name, "node removed from cache");
                self.cache.remove(&node.metadata.name);
            }
        }
    }
}
