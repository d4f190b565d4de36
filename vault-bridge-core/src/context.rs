use crate::telemetry::SpanContext;
use crate::types::CallerClaims;

/// Request-scoped values threaded explicitly through every layer.
///
/// Claims are only ever attached by the transport after the bearer
/// credential has been verified; nothing below the transport re-checks them.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    claims: Option<CallerClaims>,
    span: Option<SpanContext>,
    correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claims(mut self, claims: Option<CallerClaims>) -> Self {
        self.claims = claims;
        self
    }

    pub fn with_span(mut self, span: Option<SpanContext>) -> Self {
        self.span = span;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Copy of this context whose active span is `span`.
    pub fn in_span(&self, span: SpanContext) -> Self {
        Self {
            claims: self.claims.clone(),
            span: Some(span),
            correlation_id: self.correlation_id.clone(),
        }
    }

    pub fn claims(&self) -> Option<&CallerClaims> {
        self.claims.as_ref()
    }

    pub fn span(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}
