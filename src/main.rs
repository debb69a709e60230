use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use causal_memory::cluster::{ClusterApis, KubeClient};
use causal_memory::{CollectorConfig, JsonlSink, PatternRegistry, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let config = CollectorConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        namespace = %config.namespace,
        output = %config.output_dir.display(),
        api_server = %config.api_server,
        "causal-memory collector starting"
    );

    let client = KubeClient::new(&config).context("failed to build cluster client")?;
    let apis = ClusterApis::from_client(&client, &config.namespace);

    let sink = Arc::new(JsonlSink::open(&config.output_dir).context("failed to initialize sink")?);
    let registry = PatternRegistry::builtin();
    if let Err(e) = registry.write_catalog(&config.output_dir) {
        tracing::warn!(error = %e, "pattern catalog not written");
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        signal_cancel.cancel();
    });

    let supervisor = Supervisor::start(&apis, Arc::clone(&sink), &registry, &config, cancel);
    let outcome = supervisor.wait().await;
    sink.close();

    outcome.context("collector stopped with an error")?;
    tracing::info!("collector stopped");
    Ok(())
}

/// SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "SIGTERM handler unavailable"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "signal handler failed");
    }
}
