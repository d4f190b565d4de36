use std::borrow::Cow;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::trace::{
    Span as _, SpanId, SpanKind, TraceContextExt, TraceFlags, TraceId, TraceState, Tracer as _,
};
use opentelemetry::{Context as OtelContext, KeyValue};
use tracing::{Instrument, Span, info_span};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use vault_bridge_core::{ActiveSpan, SpanContext, Tracer};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const TRACEPARENT_HEADER: &str = "traceparent";

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

pub fn init(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false),
        )
        .try_init()
        .ok();

    Ok(())
}

pub fn correlation_header_value(value: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(value).ok()
}

pub async fn correlation_layer(mut req: Request<Body>, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let span = info_span!(
        "request",
        method = %req.method(),
        uri = %req.uri(),
        correlation_id = %correlation_id
    );

    let mut response = next.run(req).instrument(span).await;
    if let Some(value) = correlation_header_value(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

pub fn request_span(operation: &str, correlation_id: &str) -> Span {
    info_span!(
        "bridge.op",
        operation = operation,
        correlation_id = %correlation_id
    )
}

/// Incoming W3C trace context, if the caller sent a well-formed one.
pub fn parent_from_headers(headers: &HeaderMap) -> Option<SpanContext> {
    headers
        .get(TRACEPARENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(SpanContext::from_traceparent)
}

/// [`Tracer`] backed by the OpenTelemetry global tracer provider. Span ids
/// are allocated by the bridge so the ids carried in request contexts match
/// the exported spans.
pub struct OtelTracer {
    tracer: BoxedTracer,
}

impl OtelTracer {
    pub fn new(service_name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            tracer: global::tracer(service_name),
        }
    }
}

impl Tracer for OtelTracer {
    fn start_span(&self, name: &str, parent: Option<&SpanContext>) -> Box<dyn ActiveSpan> {
        let context = parent.map_or_else(SpanContext::new_root, SpanContext::child);

        let mut builder = self
            .tracer
            .span_builder(name.to_string())
            .with_kind(SpanKind::Internal);
        if let Ok(span_id) = SpanId::from_hex(context.span_id()) {
            builder = builder.with_span_id(span_id);
        }
        let parent_cx = match parent.and_then(to_otel) {
            Some(remote) => OtelContext::new().with_remote_span_context(remote),
            None => {
                if let Ok(trace_id) = TraceId::from_hex(context.trace_id()) {
                    builder = builder.with_trace_id(trace_id);
                }
                OtelContext::new()
            }
        };
        let span = builder.start_with_context(&self.tracer, &parent_cx);

        Box::new(OtelSpan { context, span })
    }
}

struct OtelSpan {
    context: SpanContext,
    span: BoxedSpan,
}

impl ActiveSpan for OtelSpan {
    fn context(&self) -> &SpanContext {
        &self.context
    }

    fn set_tag(&mut self, key: &str, value: &str) {
        self.span
            .set_attribute(KeyValue::new(key.to_string(), value.to_string()));
    }

    fn finish(mut self: Box<Self>) {
        self.span.end();
    }
}

fn to_otel(context: &SpanContext) -> Option<opentelemetry::trace::SpanContext> {
    let trace_id = TraceId::from_hex(context.trace_id()).ok()?;
    let span_id = SpanId::from_hex(context.span_id()).ok()?;
    let flags = if context.is_sampled() {
        TraceFlags::SAMPLED
    } else {
        TraceFlags::default()
    };
    Some(opentelemetry::trace::SpanContext::new(
        trace_id,
        span_id,
        flags,
        true,
        TraceState::default(),
    ))
}
