use std::sync::Arc;

use super::{Call, Middleware, Observer, Outcome, layer};
use crate::context::RequestContext;
use crate::telemetry::{ActiveSpan, Tracer};

/// Opens a span named `<operation>_<level>` around each call. The span is a
/// child of the caller's active span when there is one and a root otherwise;
/// inner layers see it as their parent.
pub struct TracingObserver {
    tracer: Arc<dyn Tracer>,
    level: String,
}

impl TracingObserver {
    pub fn new(tracer: Arc<dyn Tracer>, level: impl Into<String>) -> Self {
        Self {
            tracer,
            level: level.into(),
        }
    }
}

impl Observer for TracingObserver {
    type Scope = Box<dyn ActiveSpan>;

    fn enter(&self, ctx: &RequestContext, call: &Call) -> Box<dyn ActiveSpan> {
        let operation = call.operation().as_str();
        let name = format!("{operation}_{level}", level = self.level);
        let mut span = self.tracer.start_span(&name, ctx.span());
        span.set_tag("operation", operation);
        span.set_tag("level", &self.level);
        if let Some(parent) = ctx.span() {
            span.set_tag("parent_span_id", parent.span_id());
        }
        span
    }

    fn inner_context(
        &self,
        span: &Box<dyn ActiveSpan>,
        ctx: &RequestContext,
    ) -> Option<RequestContext> {
        Some(ctx.in_span(span.context().clone()))
    }

    fn exit(&self, mut span: Box<dyn ActiveSpan>, _call: &Call, outcome: Outcome<'_>) {
        if let Err(err) = outcome {
            span.set_tag("error", "true");
            span.set_tag("error.code", err.code());
        }
        span.finish();
    }
}

pub fn middleware(tracer: Arc<dyn Tracer>, level: impl Into<String>) -> Middleware {
    layer(TracingObserver::new(tracer, level))
}
