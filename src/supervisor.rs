use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cluster::{ClusterApis, Resource, ResourceApi};
use crate::config::{CollectorConfig, ReconnectPolicy};
use crate::error::{ObserverError, SupervisorError};
use crate::observer::{ConfigMapObserver, NodeCache, NodeObserver, Observer, PodObserver, WatchLoop};
use crate::patterns::PatternRegistry;
use crate::sink::JsonlSink;

type WorkerResult = (&'static str, Result<(), ObserverError>);

/// Runs the observers side by side under one cancellation token.
///
/// The first worker error cancels everyone else; [`Supervisor::wait`]
/// returns once every task has exited.
pub struct Supervisor {
    cancel: CancellationToken,
    tasks: JoinSet<WorkerResult>,
}

impl Supervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, tasks: JoinSet::new() }
    }

    /// Node, pod and ConfigMap observers wired to one sink. The pod
    /// observer borrows node context through a shared [`NodeCache`] handle.
    pub fn start(
        apis: &ClusterApis,
        sink: Arc<JsonlSink>,
        registry: &PatternRegistry,
        config: &CollectorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let mut supervisor = Self::new(cancel);
        let policy = config.reconnect.clone();

        let nodes = NodeCache::new(Arc::clone(&apis.nodes), config.node_lookup_timeout);
        let node_observer = NodeObserver::new(nodes.clone(), Arc::clone(&sink));
        let pod_observer = PodObserver::new(nodes, Arc::clone(&sink));
        let configmap_observer = ConfigMapObserver::new(registry, sink);

        supervisor.spawn(node_observer, Arc::clone(&apis.nodes), policy.clone());
        supervisor.spawn(pod_observer, Arc::clone(&apis.pods), policy.clone());
        supervisor.spawn(configmap_observer, Arc::clone(&apis.configmaps), policy);
        supervisor
    }

    pub fn spawn<O>(&mut self, observer: O, api: Arc<dyn ResourceApi<O::Resource>>, policy: ReconnectPolicy)
    where
        O: Observer + 'static,
    {
        let kind = O::Resource::KIND;
        let watch = WatchLoop::new(observer, api, self.cancel.clone(), policy);
        self.tasks.spawn(async move { (kind, watch.run().await) });
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }

    pub async fn wait(mut self) -> Result<(), SupervisorError> {
        let mut failure: Option<SupervisorError> = None;
        while let Some(joined) = self.tasks.join_next().await {
            let err = match joined {
                Ok((kind, Ok(()))) => {
                    info!(kind, "observer exited");
                    continue;
                }
                Ok((kind, Err(source))) => {
                    error!(kind, error = %source, "observer failed");
                    SupervisorError::Worker { kind, source }
                }
                Err(join) => {
                    error!(error = %join, "observer task aborted");
                    SupervisorError::Join(join)
                }
            };
            if failure.is_none() {
                self.cancel.cancel();
                failure = Some(err);
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
