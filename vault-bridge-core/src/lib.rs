//! Core of the vault bridge: per-request policy derivation, the six key
//! operations over a [`SecretStore`], and the decorators that add logging,
//! metrics, tracing and alerting around them.

pub mod authz;
pub mod context;
pub mod errors;
pub mod middleware;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod types;

pub use context::RequestContext;
pub use errors::{BridgeError, Result, StoreError};
pub use middleware::{Middleware, compose};
pub use service::{BasicKeyService, KeyService, SharedKeyService};
pub use store::{SecretStore, StoreResult, memory::MemoryStore};
pub use telemetry::{ActiveSpan, AlertSink, MetricsSink, SpanContext, Tracer};
pub use types::{
    CallerClaims, Capability, CreateKeyParams, Credential, DecryptParams, EncryptParams,
    ExportedKeys, OperationKind, PolicySpec, SecretRecord,
};
