mod common;

use causal_memory::kernel::{
    CausalFact, ConfigReferences, CrashLoopPayload, EventType, FactPayload, ObjectSnapshot, PodState,
    SnapshotState, Stamp, Subject,
};
use causal_memory::{JsonlSink, PatternRegistry};
use common::{facts, read_jsonl, snapshots};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn crash_fact(container: &str, restarts: i32) -> CausalFact {
    CausalFact::new(
        Stamp::now(),
        EventType::CrashLoopBackOff,
        None,
        Subject {
            pod_name: Some("web-1".into()),
            namespace: Some("shop".into()),
            ..Default::default()
        },
        FactPayload::CrashLoop(CrashLoopPayload {
            container_name: container.to_string(),
            restart_count: restarts,
            wait_reason: "CrashLoopBackOff".into(),
            config_references: ConfigReferences::default(),
        }),
    )
}

fn pod_snapshot(name: &str) -> ObjectSnapshot {
    ObjectSnapshot::new(
        Stamp::now(),
        "Pod",
        name,
        "shop",
        "PodDeleted",
        SnapshotState::Pod(Box::new(PodState {
            uid: format!("uid-{name}"),
            phase: "Succeeded".into(),
            node_name: None,
            pod_ip: None,
            qos_class: "BestEffort".into(),
            restart_policy: None,
            resource_limits: Default::default(),
            config_references: ConfigReferences::default(),
            labels: Default::default(),
            annotations: Default::default(),
        })),
    )
}

#[test]
fn concurrent_writers_never_tear_lines() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonlSink::open(dir.path()).unwrap());

    let writers: Vec<_> = (0..3)
        .map(|w| {
            let sink = Arc::clone(&sink);
            thread::spawn(move || {
                let container = format!("writer-{w}");
                for i in 0..10_000 {
                    sink.emit(&crash_fact(&container, i));
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }
    sink.close();

    let lines = facts(dir.path());
    assert_eq!(lines.len(), 30_000);
    let ids: HashSet<String> = lines.iter().map(|l| l["id"].as_str().unwrap().to_string()).collect();
    assert_eq!(ids.len(), 30_000);
    for w in 0..3 {
        let name = format!("writer-{w}");
        let mine = lines.iter().filter(|l| l["payload"]["container_name"] == name.as_str()).count();
        assert_eq!(mine, 10_000);
    }
    assert_eq!(sink.stats().facts_written, 30_000);
    assert_eq!(sink.stats().dropped, 0);
}

#[test]
fn facts_and_snapshots_go_to_separate_streams() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonlSink::open(dir.path()).unwrap());

    let a = {
        let sink = Arc::clone(&sink);
        thread::spawn(move || (0..500).for_each(|i| sink.emit(&crash_fact("app", i))))
    };
    let b = {
        let sink = Arc::clone(&sink);
        thread::spawn(move || (0..500).for_each(|i| sink.emit_snapshot(&pod_snapshot(&format!("pod-{i}")))))
    };
    a.join().unwrap();
    b.join().unwrap();
    sink.close();

    let f = facts(dir.path());
    let s = snapshots(dir.path());
    assert_eq!(f.len(), 500);
    assert_eq!(s.len(), 500);
    assert!(f.iter().all(|l| l["event_type"] == "CrashLoopBackOff"));
    assert!(s.iter().all(|l| l["object_kind"] == "Pod" && l["trigger_event"] == "PodDeleted"));
}

#[test]
fn fact_wire_shape_omits_absent_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonlSink::open(dir.path()).unwrap();
    let fact = crash_fact("app", 2);
    sink.emit(&fact);
    sink.close();

    let line = &facts(dir.path())[0];
    let obj = line.as_object().unwrap();
    assert_eq!(line["id"], fact.id().to_string());
    assert!(line["timestamp"].as_str().unwrap().parse::<chrono::DateTime<chrono::Utc>>().is_ok());
    assert_eq!(line["pod_name"], "web-1");
    assert_eq!(line["namespace"], "shop");
    assert!(!obj.contains_key("pattern_id"));
    assert!(!obj.contains_key("node_name"));
    assert!(!obj.contains_key("pod_uid"));
    assert!(line["payload"].is_object());
}

#[test]
fn emit_after_close_is_dropped_quietly() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonlSink::open(dir.path()).unwrap();
    sink.emit(&crash_fact("app", 1));
    sink.close();
    sink.close();

    sink.emit(&crash_fact("app", 2));
    sink.emit_snapshot(&pod_snapshot("late"));

    let stats = sink.stats();
    assert_eq!(stats.facts_written, 1);
    assert_eq!(stats.snapshots_written, 0);
    assert_eq!(stats.dropped, 2);
    assert_eq!(facts(dir.path()).len(), 1);
    assert!(snapshots(dir.path()).is_empty());
}

#[test]
fn reopening_appends_to_existing_streams() {
    let dir = tempfile::tempdir().unwrap();
    {
        let sink = JsonlSink::open(dir.path()).unwrap();
        sink.emit(&crash_fact("app", 1));
    }
    {
        let sink = JsonlSink::open(dir.path()).unwrap();
        sink.emit(&crash_fact("app", 2));
    }
    let lines = facts(dir.path());
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["payload"]["restart_count"], 1);
    assert_eq!(lines[1]["payload"]["restart_count"], 2);
}

#[test]
fn open_creates_missing_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let sink = JsonlSink::open(&nested).unwrap();
    assert_eq!(sink.dir(), nested.as_path());
    assert!(nested.join("events.jsonl").exists());
    assert!(nested.join("snapshots.jsonl").exists());
}

#[test]
fn pattern_catalog_is_written_next_to_the_streams() {
    let dir = tempfile::tempdir().unwrap();
    PatternRegistry::builtin().write_catalog(dir.path()).unwrap();

    let raw = std::fs::read_to_string(dir.path().join("patterns.json")).unwrap();
    let catalog: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let ids: Vec<&str> = catalog
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["P001", "P002", "P003"]);
    assert!(read_jsonl(&dir.path().join("events.jsonl")).is_empty());
}
