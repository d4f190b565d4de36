use std::sync::Arc;

use vault_bridge_core::{SharedKeyService, Tracer};

use crate::auth::IdentityVerifier;

pub type SharedVerifier = Arc<IdentityVerifier>;

#[derive(Clone)]
pub struct AppState {
    pub service: SharedKeyService,
    pub verifier: SharedVerifier,
    /// Opens the transport and endpoint spans; `None` when tracing is off.
    pub tracer: Option<Arc<dyn Tracer>>,
}

impl AppState {
    pub fn new(service: SharedKeyService, verifier: SharedVerifier) -> Self {
        Self {
            service,
            verifier,
            tracer: None,
        }
    }

    pub fn with_tracer(mut self, tracer: Option<Arc<dyn Tracer>>) -> Self {
        self.tracer = tracer;
        self
    }
}
