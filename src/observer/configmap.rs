use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::Observer;
use crate::cluster::{ConfigMap, WatchEvent};
use crate::kernel::{
    CausalFact, ConfigChangePayload, ContentDigest, EventType, FactPayload, FingerprintCache, Stamp, Subject,
};
use crate::patterns::{PatternId, PatternRegistry};
use crate::sink::JsonlSink;

fn digest(cm: &ConfigMap) -> ContentDigest {
    ContentDigest::compute(&cm.data, &cm.binary_data)
}

/// Tracks a content fingerprint per ConfigMap and reports substantive
/// edits. Metadata-only updates hash identically and are suppressed.
pub struct ConfigMapObserver {
    cache: FingerprintCache,
    sink: Arc<JsonlSink>,
    /// Patterns a content change can set off, resolved once from the catalog.
    potential_patterns: Vec<PatternId>,
}

impl ConfigMapObserver {
    pub fn new(registry: &PatternRegistry, sink: Arc<JsonlSink>) -> Self {
        Self {
            cache: FingerprintCache::new(),
            sink,
            potential_patterns: registry.triggered_by(&EventType::ConfigMapChanged),
        }
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    fn capture_change(
        &self,
        cm: &ConfigMap,
        previous: Option<&ContentDigest>,
        current: Option<&ContentDigest>,
        kind: &'static str,
    ) {
        let changed_keys = match (current, previous) {
            (Some(current), previous) => current.changed_keys(previous),
            (None, Some(previous)) => previous.key_names().map(str::to_string).collect(),
            (None, None) => Vec::new(),
        };
        let key_count = current.or(previous).map(ContentDigest::key_count).unwrap_or(0);
        let fingerprint = |d: Option<&ContentDigest>| d.map(|d| d.fingerprint().to_string()).unwrap_or_default();

        let payload = ConfigChangePayload {
            configmap_name: cm.metadata.name.clone(),
            namespace: cm.metadata.namespace.clone(),
            resource_version: cm.metadata.resource_version.clone(),
            old_content_hash: fingerprint(previous),
            new_content_hash: fingerprint(current),
            changed_keys,
            key_count,
            event_type: kind,
            potential_patterns: self.potential_patterns.clone(),
            content_captured: false,
        };
        info!(
            namespace = %cm.metadata.namespace,
            name = %cm.metadata.name,
            keys = payload.changed_keys.len(),
            kind,
            "ConfigMap changed"
        );
        let fact = CausalFact::new(
            Stamp::now(),
            EventType::ConfigMapChanged,
            None,
            Subject::namespace(&cm.metadata.namespace),
            FactPayload::ConfigChange(payload),
        );
        self.sink.emit(&fact);
    }
}

#[async_trait]
impl Observer for ConfigMapObserver {
    type Resource = ConfigMap;

    /// The listing is the whole truth: objects deleted while disconnected
    /// drop out of the cache here.
    fn prime(&mut self, items: Vec<ConfigMap>) {
        self.cache.replace_all(items.iter().map(|cm| {
            (FingerprintCache::identity(&cm.metadata.namespace, &cm.metadata.name), digest(cm))
        }));
    }

    async fn handle(&mut self, event: WatchEvent<ConfigMap>) {
        match event {
            // Startup population and post-reconnect replays; never a change.
            WatchEvent::Added(cm) => {
                let id = FingerprintCache::identity(&cm.metadata.namespace, &cm.metadata.name);
                self.cache.record(id, digest(&cm));
            }
            WatchEvent::Modified(cm) => {
                let id = FingerprintCache::identity(&cm.metadata.namespace, &cm.metadata.name);
                let current = digest(&cm);
                if !self.cache.has_changed(&id, current.fingerprint()) {
                    debug!(configmap = %id, "metadata-only update suppressed");
                    return;
                }
                self.capture_change(&cm, self.cache.get(&id), Some(&current), "MODIFIED");
                self.cache.record(id, current);
            }
            WatchEvent::Deleted(cm) => {
                let id = FingerprintCache::identity(&cm.metadata.namespace, &cm.metadata.name);
                let previous = self.cache.remove(&id);
                let previous = previous.unwrap_or_else(|| digest(&cm));
                self.capture_change(&cm, Some(&previous), None, "DELETED");
            }
        }
    }
}
