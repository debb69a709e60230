use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the cluster control plane.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("http transport error on {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("api server returned {status} for {path}")]
    Status { path: String, status: u16 },

    #[error("failed to decode {kind} response: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} lookup for {name} timed out after {timeout:?}")]
    LookupTimeout {
        kind: &'static str,
        name: String,
        timeout: Duration,
    },

    #[error("watch subscription for {kind} could not be established: {reason}")]
    Subscribe { kind: &'static str, reason: String },
}

/// Failures opening or writing the output streams.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create output dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {record}: {source}")]
    Serialize {
        record: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {record}: {source}")]
    Write {
        record: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("sink already closed")]
    Closed,
}

/// Terminal failures of a single observer loop.
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("{kind} watch failed: {source}")]
    InitialSubscription {
        kind: &'static str,
        #[source]
        source: ClusterError,
    },

    #[error("{kind} watch could not be re-established after {attempts} attempts: {source}")]
    ReconnectExhausted {
        kind: &'static str,
        attempts: u32,
        #[source]
        source: ClusterError,
    },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("observer {kind} failed: {source}")]
    Worker {
        kind: &'static str,
        #[source]
        source: ObserverError,
    },

    #[error("observer task panicked or was aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}
