pub mod alerting;
pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod models;
pub mod state;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vault_bridge_core::middleware::{self, Middleware};
use vault_bridge_core::{
    BasicKeyService, MemoryStore, SecretStore, SharedKeyService, Tracer, compose,
};
use vault_bridge_vault::VaultStore;

use crate::alerting::WebhookAlertSink;
use crate::auth::IdentityVerifier;
use crate::config::{BackendKind, BridgeConfig};
use crate::metrics::InfluxMetrics;
use crate::telemetry::OtelTracer;

pub use state::AppState;
pub use telemetry::CorrelationId;

const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the store, the decorated key service and the request verifier.
/// The returned handles belong to the metrics and alert forwarders; they
/// finish once the state and every clone of it are dropped.
pub async fn build_state(config: &BridgeConfig) -> anyhow::Result<(AppState, Vec<JoinHandle<()>>)> {
    let store = build_store(config).await?;
    let core: SharedKeyService = Arc::new(BasicKeyService::new(store));

    let tracer: Option<Arc<dyn Tracer>> = if config.tracing.enabled {
        Some(Arc::new(OtelTracer::new(config.tracing.service_name.clone())))
    } else {
        None
    };

    let mut handles = Vec::new();
    let mut layers: Vec<Middleware> = Vec::new();

    if config.influx.enabled {
        let (sink, handle) = InfluxMetrics::spawn(&config.influx)?;
        layers.push(middleware::metrics::middleware(Arc::new(sink)));
        handles.push(handle);
    }
    if let Some(url) = &config.alerting.webhook_url {
        let (sink, handle) = WebhookAlertSink::spawn(url, config.alert_environment())?;
        layers.push(middleware::alerting::middleware(Arc::new(sink)));
        handles.push(handle);
    }
    if let Some(tracer) = &tracer {
        layers.push(middleware::trace::middleware(tracer.clone(), "component"));
    }
    layers.push(middleware::logging::middleware());
    if let Some(tracer) = &tracer {
        layers.push(middleware::trace::middleware(tracer.clone(), "module"));
    }

    let service = compose(core, layers);
    let verifier = IdentityVerifier::from_config(&config.auth)?;
    let state = AppState::new(service, Arc::new(verifier)).with_tracer(tracer);
    Ok((state, handles))
}

async fn build_store(config: &BridgeConfig) -> anyhow::Result<Box<dyn SecretStore>> {
    match config.backend {
        BackendKind::Memory => {
            warn!("using the in-memory store; data is lost on exit");
            Ok(Box::new(MemoryStore::new()))
        }
        BackendKind::Vault => {
            let vault = config.vault_client_config()?;
            // The blocking HTTP client must be built off the async workers.
            let store = tokio::task::spawn_blocking(move || VaultStore::new(vault))
                .await
                .context("vault client setup was interrupted")??;
            info!(addr = %store.config().addr, "vault store ready");
            Ok(Box::new(store))
        }
    }
}

pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let (state, background) = build_state(&config).await?;

    let listener = TcpListener::bind(config.http.bind)
        .await
        .with_context(|| format!("failed to bind http listener on {}", config.http.bind))?;
    let http_addr = listener.local_addr()?;
    info!(%http_addr, backend = %config.backend, "http server listening");

    let router = http::router(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    info!("http server stopped");

    // Dropping the last state reference closes the forwarder channels. The
    // vault client is blocking, so it has to be released off the async workers.
    tokio::task::spawn_blocking(move || drop(state))
        .await
        .context("failed to release application state")?;

    for handle in background {
        match tokio::time::timeout(BACKGROUND_DRAIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "background task failed"),
            Err(_) => warn!("background task did not drain in time"),
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(?err, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
