//! The consumed side of the control plane: list, watch and point-get per
//! resource kind.

pub mod client;
pub mod types;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::ClusterError;

pub use client::{KubeClient, KubeResource};
pub use types::{ConfigMap, Node, Pod, Resource};

/// One change notification. Bookmarks and other protocol frames never
/// reach observers.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl<K> WatchEvent<K> {
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "ADDED",
            WatchEvent::Modified(_) => "MODIFIED",
            WatchEvent::Deleted(_) => "DELETED",
        }
    }

    pub fn object(&self) -> &K {
        match self {
            WatchEvent::Added(k) | WatchEvent::Modified(k) | WatchEvent::Deleted(k) => k,
        }
    }
}

/// Notifications for one subscription. The channel closing means the
/// server ended the stream and the caller should re-list and re-watch.
pub type WatchStream<K> = mpsc::Receiver<WatchEvent<K>>;

#[async_trait]
pub trait ResourceApi<K: Resource>: Send + Sync {
    /// Bulk-list every current object of the kind.
    async fn list(&self) -> Result<Vec<K>, ClusterError>;

    /// Open an incremental change feed.
    async fn watch(&self) -> Result<WatchStream<K>, ClusterError>;

    /// Point lookup by name. `Ok(None)` when the object does not exist.
    async fn get(&self, name: &str) -> Result<Option<K>, ClusterError>;
}

/// One API handle per observed kind.
#[derive(Clone)]
pub struct ClusterApis {
    pub nodes: Arc<dyn ResourceApi<Node>>,
    pub pods: Arc<dyn ResourceApi<Pod>>,
    pub configmaps: Arc<dyn ResourceApi<ConfigMap>>,
}

impl ClusterApis {
    /// Nodes are cluster-scoped; pods and config maps honour `namespace`
    /// (empty = all namespaces).
    pub fn from_client(client: &KubeClient, namespace: &str) -> Self {
        Self {
            nodes: Arc::new(client.resource::<Node>("")),
            pods: Arc::new(client.resource::<Pod>(namespace)),
            configmaps: Arc::new(client.resource::<ConfigMap>(namespace)),
        }
    }
}
