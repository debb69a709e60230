mod common;

use causal_memory::cluster::{Node, WatchEvent};
use causal_memory::observer::{NodeCache, NodeObserver, Observer};
use common::{facts, node, open_sink, FakeApi};
use std::time::Duration;

#[tokio::test]
async fn memory_pressure_emits_a_precursor_fact() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::<Node>::new();
    let mut obs = NodeObserver::new(NodeCache::new(api, Duration::from_millis(100)), open_sink(dir.path()));

    obs.prime(vec![node("worker-1", false)]);
    obs.handle(WatchEvent::Modified(node("worker-1", false))).await;
    assert!(facts(dir.path()).is_empty());

    obs.handle(WatchEvent::Modified(node("worker-1", true))).await;
    let out = facts(dir.path());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["event_type"], "NodeMemoryPressure");
    assert_eq!(out[0]["pattern_id"], "P001");
    assert_eq!(out[0]["node_name"], "worker-1");
    assert!(out[0].get("pod_name").is_none());
    assert_eq!(out[0]["payload"]["pressure_active"], true);
    assert_eq!(out[0]["payload"]["node_snapshot"]["memory_pressure"], true);
    assert_eq!(out[0]["payload"]["node_snapshot"]["conditions"]["Ready"], "True");
}

#[tokio::test]
async fn relisted_node_is_not_news_but_a_new_one_is() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::<Node>::new();
    let mut obs = NodeObserver::new(NodeCache::new(api, Duration::from_millis(100)), open_sink(dir.path()));

    obs.prime(vec![node("worker-1", true)]);
    obs.handle(WatchEvent::Added(node("worker-1", true))).await;
    assert!(facts(dir.path()).is_empty());

    obs.handle(WatchEvent::Added(node("worker-2", true))).await;
    let out = facts(dir.path());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["node_name"], "worker-2");
}

#[tokio::test]
async fn snapshots_are_independent_copies() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::<Node>::new();
    let mut obs = NodeObserver::new(NodeCache::new(api, Duration::from_millis(100)), open_sink(dir.path()));
    let cache = obs.cache();

    obs.prime(vec![node("worker-1", true)]);
    let mut taken = cache.snapshot("worker-1").await.unwrap();
    taken.memory_pressure = false;
    taken.conditions.clear();

    let again = cache.cached_snapshot("worker-1").unwrap();
    assert!(again.memory_pressure);
    assert_eq!(again.conditions.len(), 4);

    // Later updates do not reach a snapshot already handed out.
    let held = cache.cached_snapshot("worker-1").unwrap();
    obs.handle(WatchEvent::Modified(node("worker-1", false))).await;
    assert!(held.memory_pressure);
    assert!(!cache.cached_snapshot("worker-1").unwrap().memory_pressure);
}

#[tokio::test]
async fn cache_miss_falls_back_to_lookup_and_remembers() {
    let api = FakeApi::<Node>::new();
    api.insert_object("worker-9", node("worker-9", false));
    let cache = NodeCache::new(api.clone(), Duration::from_millis(100));

    assert!(!cache.contains("worker-9"));
    let first = cache.snapshot("worker-9").await.unwrap();
    assert_eq!(first.node_name, "worker-9");
    assert_eq!(first.capacity_memory.as_deref(), Some("16Gi"));
    assert!(cache.contains("worker-9"));

    cache.snapshot("worker-9").await.unwrap();
    assert_eq!(api.get_count(), 1);
}

#[tokio::test]
async fn unknown_or_blank_node_yields_nothing() {
    let api = FakeApi::<Node>::new();
    let cache = NodeCache::new(api.clone(), Duration::from_millis(100));

    assert!(cache.snapshot("ghost").await.is_none());
    assert!(cache.snapshot("").await.is_none());
    assert_eq!(api.get_count(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn stalled_lookup_times_out() {
    let api = FakeApi::<Node>::new();
    api.insert_object("worker-1", node("worker-1", true));
    api.set_get_delay(Duration::from_secs(30));
    let cache = NodeCache::new(api, Duration::from_millis(30));

    let started = std::time::Instant::now();
    assert!(cache.snapshot("worker-1").await.is_none());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!cache.contains("worker-1"));
}

#[tokio::test]
async fn deleted_node_is_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::<Node>::new();
    let mut obs = NodeObserver::new(NodeCache::new(api, Duration::from_millis(100)), open_sink(dir.path()));
    let cache = obs.cache();

    obs.prime(vec![node("worker-1", false), node("worker-2", false)]);
    assert_eq!(cache.len(), 2);
    obs.handle(WatchEvent::Deleted(node("worker-1", false))).await;
    assert!(!cache.contains("worker-1"));
    assert!(cache.contains("worker-2"));
    assert!(facts(dir.path()).is_empty());
}
