use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::error;

use super::{Call, Middleware, Observer, Outcome, layer};
use crate::context::RequestContext;
use crate::telemetry::AlertSink;

/// Forwards failed calls to an [`AlertSink`], tagged with the method and
/// the call's non-secret identifiers. Successful calls are ignored.
pub struct AlertingObserver {
    sink: Arc<dyn AlertSink>,
}

impl AlertingObserver {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }
}

impl Observer for AlertingObserver {
    type Scope = Option<String>;

    fn enter(&self, ctx: &RequestContext, _call: &Call) -> Option<String> {
        ctx.correlation_id().map(str::to_string)
    }

    fn exit(&self, correlation_id: Option<String>, call: &Call, outcome: Outcome<'_>) {
        let Err(err) = outcome else {
            return;
        };
        error!(
            method = %call.operation(),
            error = %err,
            error_code = err.code(),
            "key operation failed"
        );
        let mut tags: BTreeMap<String, String> = call
            .fields()
            .iter()
            .filter(|(name, _)| !name.ends_with("_len"))
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect();
        tags.insert("method".into(), call.operation().as_str().to_string());
        if let Some(id) = correlation_id {
            tags.insert("correlation_id".into(), id);
        }
        self.sink.capture(err, &tags);
    }
}

pub fn middleware(sink: Arc<dyn AlertSink>) -> Middleware {
    layer(AlertingObserver::new(sink))
}
