//! InfluxDB (v1 `/write` API) metrics client.
//!
//! Observations are queued on an unbounded channel and written in batches by
//! a background task, so recording a metric never blocks or fails a request.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vault_bridge_core::MetricsSink;
use vault_bridge_core::telemetry::Labels;

use crate::config::InfluxConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub field: &'static str,
    pub value: f64,
    pub timestamp: SystemTime,
}

#[derive(Clone)]
pub struct InfluxMetrics {
    tx: mpsc::UnboundedSender<Point>,
    counter_table: String,
    histogram_table: String,
}

impl InfluxMetrics {
    /// Starts the flusher and returns the sink feeding it. The task exits
    /// after a final flush once every clone of the sink is dropped.
    pub fn spawn(config: &InfluxConfig) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build influx HTTP client")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = InfluxWriter {
            client,
            config: config.clone(),
        };
        let interval = Duration::from_millis(config.flush_interval_ms.max(1));
        let handle = tokio::spawn(run_flusher(rx, writer, interval));
        Ok((
            Self {
                tx,
                counter_table: config.counter_table.clone(),
                histogram_table: config.histogram_table.clone(),
            },
            handle,
        ))
    }

    fn enqueue(&self, measurement: &str, labels: &Labels<'_>, field: &'static str, value: f64) {
        let point = Point {
            measurement: measurement.to_string(),
            tags: labels
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            field,
            value,
            timestamp: SystemTime::now(),
        };
        if self.tx.send(point).is_err() {
            debug!("metrics flusher stopped; dropping point");
        }
    }
}

impl MetricsSink for InfluxMetrics {
    fn add_counter(&self, labels: &Labels<'_>, delta: f64) {
        self.enqueue(&self.counter_table, labels, "count", delta);
    }

    fn observe_histogram(&self, labels: &Labels<'_>, value: f64) {
        self.enqueue(&self.histogram_table, labels, "value", value);
    }
}

struct InfluxWriter {
    client: reqwest::Client,
    config: InfluxConfig,
}

impl InfluxWriter {
    async fn write(&self, points: &[Point]) {
        let body = points
            .iter()
            .map(|point| encode_line(point, &self.config.precision))
            .collect::<Vec<_>>()
            .join("\n");

        let url = format!("{}/write", self.config.url.trim_end_matches('/'));
        let mut query = vec![
            ("db", self.config.database.clone()),
            ("precision", self.config.precision.clone()),
        ];
        if let Some(rp) = &self.config.retention_policy {
            query.push(("rp", rp.clone()));
        }
        if let Some(consistency) = &self.config.write_consistency {
            query.push(("consistency", consistency.clone()));
        }

        let mut request = self.client.post(url).query(&query).body(body);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(points = points.len(), "metrics flushed");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(%status, body = %body, points = points.len(), "influx rejected metrics batch");
            }
            Err(err) => {
                warn!(error = %err, points = points.len(), "failed to flush metrics");
            }
        }
    }
}

async fn run_flusher(
    mut rx: mpsc::UnboundedReceiver<Point>,
    writer: InfluxWriter,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut buffer = Vec::new();
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(point) => buffer.push(point),
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    writer.write(&buffer).await;
                    buffer.clear();
                }
            }
        }
    }
    if !buffer.is_empty() {
        writer.write(&buffer).await;
    }
}

/// Encodes one point in InfluxDB line protocol.
pub fn encode_line(point: &Point, precision: &str) -> String {
    let mut line = escape(&point.measurement, &[',', ' ']);
    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape(key, &[',', ' ', '=']));
        line.push('=');
        line.push_str(&escape(value, &[',', ' ', '=']));
    }
    line.push(' ');
    line.push_str(point.field);
    line.push('=');
    line.push_str(&point.value.to_string());
    line.push(' ');
    line.push_str(&timestamp(point.timestamp, precision).to_string());
    line
}

fn escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn timestamp(at: SystemTime, precision: &str) -> u128 {
    let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    match precision {
        "ns" | "n" => since_epoch.as_nanos(),
        "us" | "u" => since_epoch.as_micros(),
        "s" => u128::from(since_epoch.as_secs()),
        _ => since_epoch.as_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(field: &'static str, value: f64) -> Point {
        Point {
            measurement: "vault_counter".into(),
            tags: vec![
                ("method".into(), "readkey".into()),
                ("error".into(), "false".into()),
            ],
            field,
            value,
            timestamp: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
        }
    }

    #[test]
    fn counter_line() {
        assert_eq!(
            encode_line(&point("count", 1.0), "ms"),
            "vault_counter,method=readkey,error=false count=1 1700000000123"
        );
    }

    #[test]
    fn histogram_line_in_seconds_precision() {
        let mut histogram = point("value", 0.25);
        histogram.measurement = "vault_histogram".into();
        assert_eq!(
            encode_line(&histogram, "s"),
            "vault_histogram,method=readkey,error=false value=0.25 1700000000"
        );
    }

    #[test]
    fn special_characters_are_escaped() {
        let mut odd = point("count", 1.0);
        odd.measurement = "my table".into();
        odd.tags = vec![("a,b".into(), "c=d e".into())];
        assert_eq!(
            encode_line(&odd, "ms"),
            r"my\ table,a\,b=c\=d\ e count=1 1700000000123"
        );
    }
}
