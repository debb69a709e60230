//! Record model shared by every observer: facts, snapshots, payload shapes,
//! record identity and content fingerprints.

pub mod event;
pub mod fingerprint;
pub mod payload;
pub mod time;

pub use event::{CausalFact, EventType, ObjectSnapshot, Subject};
pub use fingerprint::{ContentDigest, ContentFingerprint, FingerprintCache};
pub use payload::*;
pub use time::{RecordId, Stamp, EVIDENCE_WINDOW_SECS};
