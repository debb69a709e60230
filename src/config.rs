use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Runtime knobs for the collector. Everything has a default; the binary
/// overlays `CAUSAL_*` environment variables.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Directory holding `events.jsonl` and `snapshots.jsonl`.
    pub output_dir: PathBuf,
    /// Empty means all namespaces.
    pub namespace: String,
    pub api_server: String,
    pub token_file: Option<PathBuf>,
    pub ca_cert_path: Option<PathBuf>,
    pub request_timeout: Duration,
    /// Upper bound on the inline node lookup during kill handling.
    pub node_lookup_timeout: Duration,
    /// Server-side lifetime requested for each watch.
    pub watch_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            namespace: String::new(),
            api_server: "http://127.0.0.1:8001".to_string(),
            token_file: None,
            ca_cert_path: None,
            request_timeout: Duration::from_secs(10),
            node_lookup_timeout: Duration::from_secs(2),
            watch_timeout: Duration::from_secs(300),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Backoff between re-subscriptions after a stream closes or a watch call
/// fails.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failed re-subscriptions tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl CollectorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Overlay values from `lookup` onto the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = lookup("CAUSAL_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CAUSAL_NAMESPACE") {
            config.namespace = v;
        }
        if let Some(v) = lookup("CAUSAL_API_SERVER") {
            config.api_server = v;
        }
        if let Some(v) = lookup("CAUSAL_TOKEN_FILE") {
            config.token_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CAUSAL_CA_CERT") {
            config.ca_cert_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CAUSAL_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse("CAUSAL_REQUEST_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("CAUSAL_NODE_LOOKUP_TIMEOUT_MS") {
            config.node_lookup_timeout = Duration::from_millis(parse("CAUSAL_NODE_LOOKUP_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("CAUSAL_WATCH_TIMEOUT_SECS") {
            config.watch_timeout = Duration::from_secs(parse("CAUSAL_WATCH_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("CAUSAL_RECONNECT_INITIAL_BACKOFF_MS") {
            config.reconnect.initial_backoff =
                Duration::from_millis(parse("CAUSAL_RECONNECT_INITIAL_BACKOFF_MS", &v)?);
        }
        if let Some(v) = lookup("CAUSAL_RECONNECT_MAX_BACKOFF_MS") {
            config.reconnect.max_backoff = Duration::from_millis(parse("CAUSAL_RECONNECT_MAX_BACKOFF_MS", &v)?);
        }
        if let Some(v) = lookup("CAUSAL_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = parse("CAUSAL_RECONNECT_MAX_ATTEMPTS", &v)?;
        }
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}
