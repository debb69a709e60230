//! Long-lived subscribers, one per resource kind.
//!
//! Every observer runs the same loop:
//!
//! ```text
//! Priming -> Streaming -> (Reconnecting -> Priming -> Streaming)* -> Stopped
//! ```
//!
//! The loop is shared ([`WatchLoop`]); an [`Observer`] only decides how to
//! seed its cache from a bulk list and what to do with each notification.

pub mod configmap;
pub mod node;
pub mod pod;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{Resource, ResourceApi, WatchEvent};
use crate::config::ReconnectPolicy;
use crate::error::ObserverError;

pub use configmap::ConfigMapObserver;
pub use node::{NodeCache, NodeObserver};
pub use pod::PodObserver;

#[async_trait]
pub trait Observer: Send {
    type Resource: Resource;

    /// Seed the local cache from a full listing. Called again after every
    /// reconnect; must not emit records.
    fn prime(&mut self, items: Vec<Self::Resource>);

    /// Process one notification, in delivery order.
    async fn handle(&mut self, event: WatchEvent<Self::Resource>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Priming,
    Streaming,
    Reconnecting,
    Stopped,
}

/// Exponential delay between re-subscriptions.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            initial: policy.initial_backoff,
            max: policy.max_backoff.max(policy.initial_backoff),
            current: policy.initial_backoff,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Drives one [`Observer`] against its change feed until cancelled.
pub struct WatchLoop<O: Observer> {
    observer: O,
    api: Arc<dyn ResourceApi<O::Resource>>,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
}

impl<O: Observer> WatchLoop<O> {
    pub fn new(
        observer: O,
        api: Arc<dyn ResourceApi<O::Resource>>,
        cancel: CancellationToken,
        policy: ReconnectPolicy,
    ) -> Self {
        Self { observer, api, cancel, policy }
    }

    /// Returns `Ok` on cancellation. Errors only when the first subscription
    /// cannot be opened or the reconnect budget runs out.
    pub async fn run(self) -> Result<(), ObserverError> {
        let WatchLoop { mut observer, api, cancel, policy } = self;
        let kind = O::Resource::KIND;
        let mut backoff = Backoff::new(&policy);
        let mut subscribed = false;
        let mut failures: u32 = 0;

        info!(kind, "observer starting");
        loop {
            debug!(kind, state = ?ObserverState::Priming, "state change");
            let listed = tokio::select! {
                _ = cancel.cancelled() => break,
                listed = api.list() => listed,
            };
            match listed {
                Ok(items) => {
                    info!(kind, count = items.len(), "cache primed");
                    observer.prime(items);
                }
                Err(e) => warn!(kind, error = %e, "cache prime failed, streaming with partial cache"),
            }

            let opened = tokio::select! {
                _ = cancel.cancelled() => break,
                opened = api.watch() => opened,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(source) if !subscribed => {
                    return Err(ObserverError::InitialSubscription { kind, source });
                }
                Err(source) => {
                    failures += 1;
                    if failures >= policy.max_attempts {
                        return Err(ObserverError::ReconnectExhausted { kind, attempts: failures, source });
                    }
                    let delay = backoff.next_delay();
                    warn!(kind, attempt = failures, ?delay, error = %source, "re-subscribe failed");
                    if !pause(&cancel, delay).await {
                        break;
                    }
                    continue;
                }
            };
            subscribed = true;
            failures = 0;

            debug!(kind, state = ?ObserverState::Streaming, "state change");
            let mut delivered: u64 = 0;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(kind, state = ?ObserverState::Stopped, "state change");
                        info!(kind, "observer stopped");
                        return Ok(());
                    }
                    next = stream.recv() => next,
                };
                let Some(event) = next else { break };
                delivered += 1;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(kind, "observer stopped mid-event");
                        return Ok(());
                    }
                    _ = observer.handle(event) => {}
                }
            }

            debug!(kind, state = ?ObserverState::Reconnecting, "state change");
            if delivered > 0 {
                backoff.reset();
            }
            let delay = backoff.next_delay();
            info!(kind, delivered, ?delay, "watch stream closed, re-priming");
            if !pause(&cancel, delay).await {
                break;
            }
        }

        info!(kind, "observer stopped");
        Ok(())
    }
}

/// Sleep unless cancelled first. False means cancelled.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
