use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Resource, ResourceApi, WatchEvent, WatchStream};
use crate::config::CollectorConfig;
use crate::error::{ClusterError, ConfigError};

const WATCH_BUFFER: usize = 256;

/// Thin HTTP client for the core/v1 API.
#[derive(Clone)]
pub struct KubeClient {
    http: Client,
    base_url: String,
    token: Option<String>,
    request_timeout: Duration,
    watch_timeout_secs: u64,
}

impl KubeClient {
    pub fn new(config: &CollectorConfig) -> Result<Self, ConfigError> {
        // No client-wide timeout: watch responses stay open for minutes.
        let mut builder = Client::builder().connect_timeout(config.request_timeout);
        if let Some(path) = &config.ca_cert_path {
            let pem = std::fs::read(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        let token = match &config.token_file {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .map_err(|source| ConfigError::Read { path: path.clone(), source })?
                    .trim()
                    .to_string(),
            ),
            None => None,
        };

        Ok(Self {
            http: builder.build()?,
            base_url: config.api_server.trim_end_matches('/').to_string(),
            token,
            request_timeout: config.request_timeout,
            watch_timeout_secs: config.watch_timeout.as_secs(),
        })
    }

    pub fn resource<K: Resource>(&self, namespace: &str) -> KubeResource<K> {
        KubeResource {
            client: self.clone(),
            namespace: namespace.to_string(),
            _kind: PhantomData,
        }
    }

    fn request(&self, path: &str) -> RequestBuilder {
        let req = self.http.get(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, path: &str, req: RequestBuilder) -> Result<Response, ClusterError> {
        req.send().await.map_err(|source| ClusterError::Transport {
            path: path.to_string(),
            source,
        })
    }
}

/// One resource kind, optionally scoped to a namespace.
pub struct KubeResource<K> {
    client: KubeClient,
    namespace: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Resource> KubeResource<K> {
    fn collection_path(&self) -> String {
        if K::NAMESPACED && !self.namespace.is_empty() {
            format!("/api/v1/namespaces/{}/{}", self.namespace, K::PLURAL)
        } else {
            format!("/api/v1/{}", K::PLURAL)
        }
    }
}

#[derive(Deserialize)]
struct ObjectList<K> {
    #[serde(default = "Vec::new")]
    items: Vec<K>,
}

#[async_trait]
impl<K> ResourceApi<K> for KubeResource<K>
where
    K: Resource + DeserializeOwned,
{
    async fn list(&self) -> Result<Vec<K>, ClusterError> {
        let path = self.collection_path();
        let req = self.client.request(&path).timeout(self.client.request_timeout);
        let response = self.client.send(&path, req).await?;
        let body = read_success(&path, response).await?;
        let list: ObjectList<K> = serde_json::from_slice(&body)
            .map_err(|source| ClusterError::Decode { kind: K::KIND, source })?;
        Ok(list.items)
    }

    async fn watch(&self) -> Result<WatchStream<K>, ClusterError> {
        let path = format!(
            "{}?watch=true&timeoutSeconds={}",
            self.collection_path(),
            self.client.watch_timeout_secs
        );
        let response = self.client.send(&path, self.client.request(&path)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClusterError::Subscribe {
                kind: K::KIND,
                reason: format!("{path} answered {status}"),
            });
        }

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        tokio::spawn(pump_watch::<K>(response, tx));
        Ok(rx)
    }

    async fn get(&self, name: &str) -> Result<Option<K>, ClusterError> {
        let path = format!("{}/{}", self.collection_path(), name);
        let req = self.client.request(&path).timeout(self.client.request_timeout);
        let response = self.client.send(&path, req).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = read_success(&path, response).await?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| ClusterError::Decode { kind: K::KIND, source })
    }
}

async fn read_success(path: &str, response: Response) -> Result<Vec<u8>, ClusterError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ClusterError::Status { path: path.to_string(), status: status.as_u16() });
    }
    let body = response.bytes().await.map_err(|source| ClusterError::Transport {
        path: path.to_string(),
        source,
    })?;
    Ok(body.to_vec())
}

#[derive(Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    object: serde_json::Value,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Frame<K> {
    Event(WatchEvent<K>),
    Skip,
    Close(String),
}

/// Decode one newline-delimited watch frame.
pub(crate) fn decode_frame<K: Resource + DeserializeOwned>(line: &[u8]) -> Frame<K> {
    let trimmed = trim_whitespace(line);
    if trimmed.is_empty() {
        return Frame::Skip;
    }
    let raw: RawWatchEvent = match serde_json::from_slice(trimmed) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(kind = K::KIND, error = %e, "undecodable watch frame skipped");
            return Frame::Skip;
        }
    };
    let wrap: fn(K) -> WatchEvent<K> = match raw.type_.as_str() {
        "ADDED" => WatchEvent::Added,
        "MODIFIED" => WatchEvent::Modified,
        "DELETED" => WatchEvent::Deleted,
        "BOOKMARK" => return Frame::Skip,
        "ERROR" => {
            let message = raw.object.get("message").and_then(|m| m.as_str()).unwrap_or("unknown");
            return Frame::Close(message.to_string());
        }
        other => {
            debug!(kind = K::KIND, frame = other, "unknown watch frame type skipped");
            return Frame::Skip;
        }
    };
    match serde_json::from_value::<K>(raw.object) {
        Ok(obj) => Frame::Event(wrap(obj)),
        Err(e) => {
            warn!(kind = K::KIND, error = %e, "undecodable watch object skipped");
            Frame::Skip
        }
    }
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Forward frames from an open watch response until the server ends it or
/// the receiving observer drops its end.
async fn pump_watch<K: Resource + DeserializeOwned>(mut response: Response, tx: mpsc::Sender<WatchEvent<K>>) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => return,
            chunk = response.chunk() => chunk,
        };
        match chunk {
            Ok(Some(bytes)) => buf.extend_from_slice(&bytes),
            Ok(None) => {
                debug!(kind = K::KIND, "watch stream ended by server");
                return;
            }
            Err(e) => {
                warn!(kind = K::KIND, error = %e, "watch stream read failed");
                return;
            }
        }

        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            match decode_frame::<K>(&line) {
                Frame::Event(event) => {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Frame::Skip => {}
                Frame::Close(reason) => {
                    warn!(kind = K::KIND, reason = %reason, "watch closed by error frame");
                    return;
                }
            }
        }
    }
}
