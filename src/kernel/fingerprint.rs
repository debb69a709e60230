//! Content-addressed change detection for configuration objects.
//!
//! Digests are computed over sorted key/value pairs only. Resource versions,
//! labels and other metadata never enter the hash, so metadata churn cannot
//! look like a content change. Values are hashed, never stored.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

const FINGERPRINT_HEX_LEN: usize = 16;
const BINARY_SUFFIX: &str = "(binary)";

/// Fixed-length digest of a config object's contents. Equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy)]
enum EntryKind {
    Text,
    Binary,
}

impl EntryKind {
    fn tag(self) -> u8 {
        match self {
            EntryKind::Text => b't',
            EntryKind::Binary => b'b',
        }
    }
}

/// Whole-object fingerprint plus one digest per key, so a later version can
/// be diffed down to the keys that moved without keeping any value around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    fingerprint: ContentFingerprint,
    keys: BTreeMap<String, ContentFingerprint>,
}

impl ContentDigest {
    /// Digest text entries and binary entries (in transport encoding). Input
    /// order is irrelevant.
    pub fn compute<'a, T, B>(data: T, binary_data: B) -> Self
    where
        T: IntoIterator<Item = (&'a String, &'a String)>,
        B: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut entries: Vec<(EntryKind, &str, &str)> = data
            .into_iter()
            .map(|(k, v)| (EntryKind::Text, k.as_str(), v.as_str()))
            .chain(
                binary_data
                    .into_iter()
                    .map(|(k, v)| (EntryKind::Binary, k.as_str(), v.as_str())),
            )
            .collect();
        entries.sort_by(|a, b| (a.0.tag(), a.1).cmp(&(b.0.tag(), b.1)));

        let mut whole = Sha256::new();
        let mut keys = BTreeMap::new();
        for (kind, key, value) in entries {
            feed_entry(&mut whole, kind, key, value);

            let mut single = Sha256::new();
            feed_entry(&mut single, kind, key, value);
            let name = match kind {
                EntryKind::Text => key.to_string(),
                EntryKind::Binary => format!("{key}{BINARY_SUFFIX}"),
            };
            keys.insert(name, truncate_hex(&single.finalize()));
        }

        Self {
            fingerprint: truncate_hex(&whole.finalize()),
            keys,
        }
    }

    pub fn fingerprint(&self) -> &ContentFingerprint {
        &self.fingerprint
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Key names, binary keys suffixed with `(binary)`.
    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Keys added, removed or modified relative to `previous`. With no
    /// previous digest every present key counts as changed.
    pub fn changed_keys(&self, previous: Option<&ContentDigest>) -> Vec<String> {
        let Some(previous) = previous else {
            return self.keys.keys().cloned().collect();
        };
        let names: BTreeSet<&String> = self.keys.keys().chain(previous.keys.keys()).collect();
        names
            .into_iter()
            .filter(|name| self.keys.get(*name) != previous.keys.get(*name))
            .cloned()
            .collect()
    }
}

fn feed_entry(hasher: &mut Sha256, kind: EntryKind, key: &str, value: &str) {
    hasher.update([kind.tag()]);
    hasher.update((key.len() as u64).to_be_bytes());
    hasher.update(key.as_bytes());
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn truncate_hex(bytes: &[u8]) -> ContentFingerprint {
    let mut hex = String::with_capacity(FINGERPRINT_HEX_LEN);
    for b in bytes.iter().take(FINGERPRINT_HEX_LEN / 2) {
        hex.push_str(&format!("{b:02x}"));
    }
    ContentFingerprint(hex)
}

/// Last known digest per `namespace/name`.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: HashMap<String, ContentDigest>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    /// True unless the identity is known and its fingerprint is unchanged.
    pub fn has_changed(&self, identity: &str, new: &ContentFingerprint) -> bool {
        match self.entries.get(identity) {
            Some(known) => known.fingerprint() != new,
            None => true,
        }
    }

    pub fn record(&mut self, identity: String, digest: ContentDigest) -> Option<ContentDigest> {
        self.entries.insert(identity, digest)
    }

    pub fn get(&self, identity: &str) -> Option<&ContentDigest> {
        self.entries.get(identity)
    }

    pub fn remove(&mut self, identity: &str) -> Option<ContentDigest> {
        self.entries.remove(identity)
    }

    /// Drop everything and start over from `entries`.
    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = (String, ContentDigest)>) {
        self.entries = entries.into_iter().collect();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
