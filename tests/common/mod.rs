#![allow(dead_code)]

use async_trait::async_trait;
use causal_memory::cluster::{ConfigMap, Node, Pod, Resource, ResourceApi, WatchEvent, WatchStream};
use causal_memory::config::ReconnectPolicy;
use causal_memory::error::ClusterError;
use causal_memory::JsonlSink;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

enum WatchScript<K> {
    Stream(mpsc::Receiver<WatchEvent<K>>),
    Fail(String),
}

/// In-memory stand-in for one resource kind of the control plane.
pub struct FakeApi<K> {
    list: Mutex<Vec<K>>,
    failing_lists: AtomicUsize,
    watches: Mutex<VecDeque<WatchScript<K>>>,
    idle: Mutex<Vec<mpsc::Sender<WatchEvent<K>>>>,
    objects: Mutex<HashMap<String, K>>,
    get_delay: Mutex<Option<Duration>>,
    pub list_calls: AtomicUsize,
    pub watch_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
}

impl<K: Resource> FakeApi<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            list: Mutex::new(Vec::new()),
            failing_lists: AtomicUsize::new(0),
            watches: Mutex::new(VecDeque::new()),
            idle: Mutex::new(Vec::new()),
            objects: Mutex::new(HashMap::new()),
            get_delay: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            watch_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_list(&self, items: Vec<K>) {
        *self.list.lock().unwrap() = items;
    }

    pub fn fail_next_lists(&self, n: usize) {
        self.failing_lists.store(n, Ordering::SeqCst);
    }

    /// Queue a stream for the next `watch()` call. Dropping the returned
    /// sender closes the stream.
    pub fn open_stream(&self) -> mpsc::Sender<WatchEvent<K>> {
        let (tx, rx) = mpsc::channel(1024);
        self.watches.lock().unwrap().push_back(WatchScript::Stream(rx));
        tx
    }

    pub fn fail_next_watch(&self, reason: &str) {
        self.watches.lock().unwrap().push_back(WatchScript::Fail(reason.to_string()));
    }

    pub fn insert_object(&self, name: &str, obj: K) {
        self.objects.lock().unwrap().insert(name.to_string(), obj);
    }

    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    pub fn watch_count(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<K: Resource> ResourceApi<K> for FakeApi<K> {
    async fn list(&self) -> Result<Vec<K>, ClusterError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_lists.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_lists.store(failing - 1, Ordering::SeqCst);
            return Err(ClusterError::Status { path: format!("/fake/{}", K::PLURAL), status: 503 });
        }
        Ok(self.list.lock().unwrap().clone())
    }

    async fn watch(&self) -> Result<WatchStream<K>, ClusterError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.watches.lock().unwrap().pop_front();
        match next {
            Some(WatchScript::Stream(rx)) => Ok(rx),
            Some(WatchScript::Fail(reason)) => Err(ClusterError::Subscribe { kind: K::KIND, reason }),
            None => {
                // Nothing scripted: a quiet stream that stays open.
                let (tx, rx) = mpsc::channel(1);
                self.idle.lock().unwrap().push(tx);
                Ok(rx)
            }
        }
    }

    async fn get(&self, name: &str) -> Result<Option<K>, ClusterError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.objects.lock().unwrap().get(name).cloned())
    }
}

pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        max_attempts: 3,
    }
}

pub fn open_sink(dir: &Path) -> Arc<JsonlSink> {
    Arc::new(JsonlSink::open(dir).expect("sink opens"))
}

pub fn read_jsonl(path: &Path) -> Vec<serde_json::Value> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|l| serde_json::from_str(l).expect("well-formed line"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub fn facts(dir: &Path) -> Vec<serde_json::Value> {
    read_jsonl(&dir.join(causal_memory::sink::EVENTS_FILE))
}

pub fn snapshots(dir: &Path) -> Vec<serde_json::Value> {
    read_jsonl(&dir.join(causal_memory::sink::SNAPSHOTS_FILE))
}

/// Poll `cond` every 5ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ---- resource builders ----

pub fn configmap(ns: &str, name: &str, rv: &str, data: &[(&str, &str)]) -> ConfigMap {
    serde_json::from_value(serde_json::json!({
        "metadata": {"name": name, "namespace": ns, "resourceVersion": rv},
        "data": data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>(),
    }))
    .unwrap()
}

pub fn node(name: &str, memory_pressure: bool) -> Node {
    serde_json::from_value(serde_json::json!({
        "metadata": {"name": name},
        "status": {
            "conditions": [
                {"type": "Ready", "status": "True"},
                {"type": "MemoryPressure", "status": if memory_pressure { "True" } else { "False" }},
                {"type": "DiskPressure", "status": "False"},
                {"type": "PIDPressure", "status": "False"}
            ],
            "allocatable": {"cpu": "3920m", "memory": "15Gi"},
            "capacity": {"cpu": "4", "memory": "16Gi"},
            "nodeInfo": {
                "kernelVersion": "6.1.0-18-cloud-amd64",
                "kubeletVersion": "v1.29.2",
                "containerRuntimeVersion": "containerd://1.7.13"
            }
        }
    }))
    .unwrap()
}

/// A pod spec referencing config through every supported route, plus the
/// given container statuses.
pub fn pod(name: &str, node_name: Option<&str>, statuses: serde_json::Value) -> Pod {
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": name,
            "namespace": "shop",
            "uid": format!("uid-{name}"),
            "labels": {"app": "web"},
            "annotations": {"team": "payments"}
        },
        "spec": {
            "nodeName": node_name,
            "restartPolicy": "Always",
            "containers": [
                {
                    "name": "web",
                    "image": "nginx:1.25",
                    "resources": {
                        "limits": {"cpu": "500m", "memory": "128Mi"},
                        "requests": {"cpu": "250m", "memory": "64Mi"}
                    },
                    "envFrom": [{"configMapRef": {"name": "web-env"}}],
                    "env": [
                        {"name": "FLAG", "valueFrom": {"configMapKeyRef": {"name": "flags", "key": "flag"}}},
                        {"name": "TOKEN", "valueFrom": {"secretKeyRef": {"name": "api-token", "key": "token"}}}
                    ]
                },
                {
                    "name": "sidecar",
                    "image": "envoy:1.29",
                    "resources": {"limits": {"memory": "32Mi"}},
                    "envFrom": [{"configMapRef": {"name": "web-env"}}]
                }
            ],
            "volumes": [
                {"name": "conf", "configMap": {"name": "web-files"}},
                {"name": "tls", "secret": {"secretName": "web-tls"}}
            ]
        },
        "status": {
            "phase": "Running",
            "qosClass": "Burstable",
            "podIP": "10.1.2.3",
            "containerStatuses": statuses
        }
    }))
    .unwrap()
}

pub fn oom_status(container: &str, restarts: i32) -> serde_json::Value {
    serde_json::json!({
        "name": container,
        "image": "nginx:1.25",
        "restartCount": restarts,
        "state": {"terminated": {
            "reason": "OOMKilled",
            "exitCode": 137,
            "startedAt": "2024-05-01T10:00:00Z",
            "finishedAt": "2024-05-01T10:00:42Z"
        }}
    })
}

pub fn terminated_status(container: &str, reason: &str, exit_code: i32) -> serde_json::Value {
    serde_json::json!({
        "name": container,
        "image": "envoy:1.29",
        "restartCount": 0,
        "state": {"terminated": {
            "reason": reason,
            "exitCode": exit_code,
            "startedAt": "2024-05-01T10:00:00Z",
            "finishedAt": "2024-05-01T10:00:05Z"
        }}
    })
}

pub fn running_after_oom_status(container: &str, restarts: i32) -> serde_json::Value {
    serde_json::json!({
        "name": container,
        "image": "nginx:1.25",
        "restartCount": restarts,
        "state": {"running": {"startedAt": "2024-05-01T10:00:45Z"}},
        "lastState": {"terminated": {
            "reason": "OOMKilled",
            "exitCode": 137,
            "startedAt": "2024-05-01T10:00:00Z",
            "finishedAt": "2024-05-01T10:00:42Z"
        }}
    })
}

pub fn crash_loop_status(container: &str, restarts: i32) -> serde_json::Value {
    serde_json::json!({
        "name": container,
        "image": "nginx:1.25",
        "restartCount": restarts,
        "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off 40s restarting failed container"}}
    })
}
