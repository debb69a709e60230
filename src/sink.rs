//! Append-only JSONL output.
//!
//! Two independent streams, each behind its own lock. A record is serialized
//! to a complete line first and written with a single `write_all` while the
//! lock is held, so lines never interleave. A write that fails partway is
//! truncated back off the file. Failures are logged and the record dropped;
//! nothing here aborts the process.

use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::SinkError;
use crate::kernel::{CausalFact, ObjectSnapshot};

pub const EVENTS_FILE: &str = "events.jsonl";
pub const SNAPSHOTS_FILE: &str = "snapshots.jsonl";
pub const PATTERNS_FILE: &str = "patterns.json";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub facts_written: u64,
    pub snapshots_written: u64,
    pub dropped: u64,
}

/// Storage that can roll a torn append back.
trait Rewind {
    fn end(&mut self) -> io::Result<u64>;
    fn rewind_to(&mut self, len: u64) -> io::Result<()>;
}

impl Rewind for File {
    fn end(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn rewind_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// An open stream file plus whether a failed write left a fragment behind.
#[derive(Debug)]
struct LineWriter<W> {
    out: W,
    torn: bool,
}

impl<W: Write + Rewind> LineWriter<W> {
    fn new(out: W) -> Self {
        Self { out, torn: false }
    }

    /// Write one complete line. On failure the partial bytes are truncated
    /// away; if that fails too, the next line starts on a fresh line so the
    /// fragment never swallows a good record.
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        if self.torn {
            self.out.write_all(b"\n")?;
            self.torn = false;
        }
        let start = self.out.end()?;
        if let Err(e) = self.out.write_all(line) {
            if let Err(rewind) = self.out.rewind_to(start) {
                warn!(error = %rewind, "could not truncate partial line");
                self.torn = true;
            }
            return Err(e);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Stream {
    label: &'static str,
    file: Mutex<Option<LineWriter<File>>>,
    written: AtomicU64,
}

impl Stream {
    fn open(label: &'static str, path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Open { path: path.to_path_buf(), source })?;
        Ok(Self { label, file: Mutex::new(Some(LineWriter::new(file))), written: AtomicU64::new(0) })
    }

    fn lock(&self) -> MutexGuard<'_, Option<LineWriter<File>>> {
        // A panic mid-write cannot leave a half record behind, so a poisoned
        // lock is still safe to keep using.
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append<T: Serialize>(&self, record: &T) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|source| SinkError::Serialize { record: self.label, source })?;
        line.push(b'\n');

        let mut guard = self.lock();
        let writer = guard.as_mut().ok_or(SinkError::Closed)?;
        writer
            .write_line(&line)
            .map_err(|source| SinkError::Write { record: self.label, source })?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flush and release. Returns false if already closed.
    fn close(&self) -> bool {
        let mut guard = self.lock();
        match guard.take() {
            Some(writer) => {
                if let Err(e) = writer.out.sync_all() {
                    warn!(stream = self.label, error = %e, "sync on close failed");
                }
                true
            }
            None => false,
        }
    }
}

/// Durable sink shared by every observer (`Arc<JsonlSink>`).
#[derive(Debug)]
pub struct JsonlSink {
    dir: PathBuf,
    facts: Stream,
    snapshots: Stream,
    dropped: AtomicU64,
}

impl JsonlSink {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|source| SinkError::CreateDir { path: dir.clone(), source })?;

        let facts = Stream::open("fact", &dir.join(EVENTS_FILE))?;
        let snapshots = Stream::open("snapshot", &dir.join(SNAPSHOTS_FILE))?;
        info!(path = %dir.join(EVENTS_FILE).display(), "events stream open");
        info!(path = %dir.join(SNAPSHOTS_FILE).display(), "snapshots stream open");

        Ok(Self { dir, facts, snapshots, dropped: AtomicU64::new(0) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn emit(&self, fact: &CausalFact) {
        match self.facts.append(fact) {
            Ok(()) => debug!(
                event_type = %fact.event_type(),
                pattern = fact.pattern_id().map(|p| p.as_str()).unwrap_or("-"),
                pod = fact.subject().pod_name.as_deref().unwrap_or("-"),
                "fact emitted"
            ),
            Err(e) => self.drop_record(fact.event_type().as_str(), e),
        }
    }

    pub fn emit_snapshot(&self, snapshot: &ObjectSnapshot) {
        match self.snapshots.append(snapshot) {
            Ok(()) => debug!(
                kind = snapshot.object_kind(),
                name = snapshot.object_name(),
                trigger = snapshot.trigger_event(),
                "snapshot emitted"
            ),
            Err(e) => self.drop_record(snapshot.object_kind(), e),
        }
    }

    fn drop_record(&self, what: &str, e: SinkError) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        error!(record = what, error = %e, "record dropped");
    }

    /// Sync and release both streams. Safe to call concurrently with emits
    /// and more than once; only the first call does anything.
    pub fn close(&self) {
        let facts = self.facts.close();
        let snapshots = self.snapshots.close();
        if facts || snapshots {
            let stats = self.stats();
            info!(
                facts = stats.facts_written,
                snapshots = stats.snapshots_written,
                dropped = stats.dropped,
                "sink closed"
            );
        }
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            facts_written: self.facts.written.load(Ordering::Relaxed),
            snapshots_written: self.snapshots.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        self.close();
    }
}
