//! Catalog of known causal chains.
//!
//! Built once at startup and shared read-only (`Arc<PatternRegistry>`).
//! Observers only tag facts with a [`PatternId`]; resolving the full chain
//! is left to whoever consumes the output.

mod catalog;

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::SinkError;
use crate::kernel::EventType;

pub use catalog::{config_env_pattern, config_mount_pattern, oom_kill_pattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatternId(&'static str);

impl PatternId {
    pub const OOM_KILL: PatternId = PatternId("P001");
    pub const CONFIG_ENV: PatternId = PatternId("P002");
    pub const CONFIG_MOUNT: PatternId = PatternId("P003");

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for PatternId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepRole {
    Trigger,
    Precursor,
    Effect,
    Evidence,
    /// The lack of the event inside the window is the signal.
    Absence,
    Propagation,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternStep {
    pub event_type: EventType,
    pub role: StepRole,
    pub optional: bool,
    /// Max distance from the trigger, in seconds. Zero for the trigger itself.
    pub window_secs: u64,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CausalPattern {
    pub id: PatternId,
    pub name: &'static str,
    pub description: &'static str,
    pub steps: Vec<PatternStep>,
    pub remediation_actions: Vec<&'static str>,
}

impl CausalPattern {
    pub fn trigger(&self) -> Option<&PatternStep> {
        self.steps.iter().find(|s| s.role == StepRole::Trigger)
    }
}

#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: BTreeMap<&'static str, CausalPattern>,
}

impl PatternRegistry {
    pub fn new(patterns: impl IntoIterator<Item = CausalPattern>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| (p.id.as_str(), p)).collect(),
        }
    }

    /// The three chains the collector knows how to tag.
    pub fn builtin() -> Self {
        Self::new([oom_kill_pattern(), config_env_pattern(), config_mount_pattern()])
    }

    pub fn get(&self, id: &str) -> Option<&CausalPattern> {
        self.patterns.get(id)
    }

    pub fn steps(&self, id: &str) -> &[PatternStep] {
        self.get(id).map(|p| p.steps.as_slice()).unwrap_or(&[])
    }

    pub fn remediation(&self, id: &str) -> &[&'static str] {
        self.get(id)
            .map(|p| p.remediation_actions.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CausalPattern> {
        self.patterns.values()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Ids of every pattern whose trigger step is `event_type`.
    pub fn triggered_by(&self, event_type: &EventType) -> Vec<PatternId> {
        self.iter()
            .filter(|p| p.trigger().is_some_and(|t| &t.event_type == event_type))
            .map(|p| p.id)
            .collect()
    }

    /// Write the catalog as a JSON array to `dir/patterns.json`.
    pub fn write_catalog(&self, dir: &Path) -> Result<(), SinkError> {
        let path = dir.join(crate::sink::PATTERNS_FILE);
        let patterns: Vec<&CausalPattern> = self.iter().collect();
        let json = serde_json::to_vec_pretty(&patterns).map_err(|source| SinkError::Serialize {
            record: "pattern catalog",
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| SinkError::Write {
            record: "pattern catalog",
            source,
        })
    }
}
