use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long the platform keeps the previous-termination field readable
/// before the next state transition overwrites it.
pub const EVIDENCE_WINDOW_SECS: i64 = 90;

/// Record identifier. UUIDv7 so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        RecordId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity and capture time stamped onto every record at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub id: RecordId,
    pub at: DateTime<Utc>,
}

impl Stamp {
    pub fn now() -> Self {
        Stamp { id: RecordId::new(), at: Utc::now() }
    }

    pub fn evidence_expires_at(&self) -> DateTime<Utc> {
        self.at + Duration::seconds(EVIDENCE_WINDOW_SECS)
    }
}
