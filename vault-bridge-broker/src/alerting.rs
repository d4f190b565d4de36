use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vault_bridge_core::{AlertSink, BridgeError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub message: String,
    pub code: &'static str,
    pub tags: BTreeMap<String, String>,
    pub environment: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

/// Forwards captured errors to an HTTP webhook as JSON, one POST per event,
/// from a background task.
#[derive(Clone)]
pub struct WebhookAlertSink {
    tx: mpsc::UnboundedSender<AlertEvent>,
    environment: String,
}

impl WebhookAlertSink {
    pub fn spawn(
        webhook_url: &str,
        environment: impl Into<String>,
    ) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build alerting HTTP client")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(forward(rx, client, webhook_url.to_string()));
        Ok((
            Self {
                tx,
                environment: environment.into(),
            },
            handle,
        ))
    }
}

impl AlertSink for WebhookAlertSink {
    fn capture(&self, error: &BridgeError, tags: &BTreeMap<String, String>) {
        let event = AlertEvent {
            message: error.to_string(),
            code: error.code(),
            tags: tags.clone(),
            environment: self.environment.clone(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };
        if self.tx.send(event).is_err() {
            debug!("alert forwarder stopped; dropping event");
        }
    }
}

async fn forward(mut rx: mpsc::UnboundedReceiver<AlertEvent>, client: reqwest::Client, url: String) {
    while let Some(event) = rx.recv().await {
        match client.post(&url).json(&event).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(status = %response.status(), code = event.code, "alert webhook rejected event");
            }
            Err(err) => {
                warn!(error = %err, code = event.code, "failed to deliver alert");
            }
        }
    }
}
