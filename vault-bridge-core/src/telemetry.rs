//! Client-side contracts for the observability backends.
//!
//! The decorators in [`crate::middleware`] only talk to these traits; the
//! broker binds them to InfluxDB, OpenTelemetry and an alert webhook.

use std::collections::BTreeMap;

use crate::errors::BridgeError;

/// W3C trace context for one span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    sampled: bool,
}

impl SpanContext {
    pub fn new_root() -> Self {
        Self {
            trace_id: format!("{:032x}", rand::random::<u128>()),
            span_id: generate_span_id(),
            parent_span_id: None,
            sampled: true,
        }
    }

    pub fn from_parts(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_span_id: Option<String>,
        sampled: bool,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id,
            sampled,
        }
    }

    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: generate_span_id(),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    #[cfg(test)]
    fn to_traceparent(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            self.trace_id,
            self.span_id,
            u8::from(self.sampled)
        )
    }

    /// Parses a `traceparent` header. Returns `None` for anything malformed
    /// so a bad header starts a fresh trace instead of failing the request.
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let parts: Vec<&str> = header.trim().split('-').collect();
        if parts.len() != 4 || parts[0] != "00" {
            return None;
        }
        let (trace_id, span_id) = (parts[1], parts[2]);
        let valid_hex = |value: &str, len: usize| {
            value.len() == len
                && value.bytes().all(|b| b.is_ascii_hexdigit())
                && value.bytes().any(|b| b != b'0')
        };
        if !valid_hex(trace_id, 32) || !valid_hex(span_id, 16) {
            return None;
        }
        let flags = u8::from_str_radix(parts[3], 16).ok()?;
        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            parent_span_id: None,
            sampled: flags & 0x01 == 0x01,
        })
    }
}

fn generate_span_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Span-based tracer supporting parent/child relationships.
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, parent: Option<&SpanContext>) -> Box<dyn ActiveSpan>;
}

/// A started span. `finish` consumes it, so a span ends at most once.
pub trait ActiveSpan: Send {
    fn context(&self) -> &SpanContext;
    fn set_tag(&mut self, key: &str, value: &str);
    fn finish(self: Box<Self>);
}

pub type Labels<'a> = [(&'a str, &'a str)];

/// Counter + histogram metrics client.
pub trait MetricsSink: Send + Sync {
    fn add_counter(&self, labels: &Labels<'_>, delta: f64);
    fn observe_histogram(&self, labels: &Labels<'_>, value: f64);
}

/// External error-alerting sink.
pub trait AlertSink: Send + Sync {
    fn capture(&self, error: &BridgeError, tags: &BTreeMap<String, String>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_keeps_trace_and_links_parent() {
        let root = SpanContext::new_root();
        let child = root.child();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_span_id(), Some(root.span_id()));
        assert_ne!(child.span_id(), root.span_id());
    }

    #[test]
    fn traceparent_round_trip() {
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let ctx = SpanContext::from_traceparent(header).unwrap();
        assert_eq!(ctx.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(ctx.is_sampled());
        assert_eq!(ctx.to_traceparent(), header);
    }

    #[test]
    fn malformed_traceparent_is_ignored() {
        assert!(SpanContext::from_traceparent("garbage").is_none());
        assert!(
            SpanContext::from_traceparent(
                "00-00000000000000000000000000000000-00f067aa0ba902b7-01"
            )
            .is_none()
        );
        assert!(SpanContext::from_traceparent("00-abc-def-01").is_none());
    }
}
