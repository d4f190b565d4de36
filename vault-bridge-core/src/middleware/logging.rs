use std::time::Instant;

use tracing::{field, info};

use super::{Call, Middleware, Observer, Outcome, layer};
use crate::context::RequestContext;

/// Emits one structured event per call. Secret inputs are only ever logged
/// as lengths.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    type Scope = Instant;

    fn enter(&self, _ctx: &RequestContext, _call: &Call) -> Instant {
        Instant::now()
    }

    fn exit(&self, started: Instant, call: &Call, outcome: Outcome<'_>) {
        let took_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            method = %call.operation(),
            path = call.field("path"),
            keyname = call.field("keyname"),
            keypath = call.field("keypath"),
            params = call.field("params"),
            key_version = call.field("key_version"),
            value_len = call.field("value_len"),
            plaintext_len = call.field("plaintext_len"),
            ciphertext_len = call.field("ciphertext_len"),
            took_ms,
            outcome = if outcome.is_ok() { "success" } else { "error" },
            error = outcome.err().map(field::display),
            error_code = outcome.err().map(|err| err.code()),
            "key operation"
        );
    }
}

pub fn middleware() -> Middleware {
    layer(LoggingObserver)
}
