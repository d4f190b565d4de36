use std::sync::Arc;
use std::time::Instant;

use super::{Call, Middleware, Observer, Outcome, layer};
use crate::context::RequestContext;
use crate::telemetry::MetricsSink;

/// Records one counter increment and one latency observation (seconds) per
/// call, labelled with `method` and `error`.
pub struct MetricsObserver {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsObserver {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }
}

impl Observer for MetricsObserver {
    type Scope = Instant;

    fn enter(&self, _ctx: &RequestContext, _call: &Call) -> Instant {
        Instant::now()
    }

    fn exit(&self, started: Instant, call: &Call, outcome: Outcome<'_>) {
        let labels = [
            ("method", call.operation().as_str()),
            ("error", if outcome.is_err() { "true" } else { "false" }),
        ];
        self.sink.add_counter(&labels, 1.0);
        self.sink
            .observe_histogram(&labels, started.elapsed().as_secs_f64());
    }
}

pub fn middleware(sink: Arc<dyn MetricsSink>) -> Middleware {
    layer(MetricsObserver::new(sink))
}
