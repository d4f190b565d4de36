//! Decorators over [`KeyService`].
//!
//! A decorator is an [`Observer`] wrapped in [`Decorated`]. `Decorated` owns
//! the delegation for all six operations and hands the observer only the
//! call description and a borrowed outcome, so an observer can add side
//! effects but has no way to change what the caller receives.
//!
//! Stacks are built from [`Middleware`] constructors, outermost first:
//!
//! ```ignore
//! let svc = middleware::compose(core, vec![
//!     metrics::middleware(sink),
//!     alerting::middleware(alerts),
//!     trace::middleware(tracer, "component"),
//!     logging::middleware(),
//! ]);
//! ```

pub mod alerting;
pub mod logging;
pub mod metrics;
pub mod trace;

use std::sync::Arc;

use crate::context::RequestContext;
use crate::errors::{BridgeError, Result};
use crate::service::{KeyService, SharedKeyService};
use crate::types::{
    CreateKeyParams, DecryptParams, EncryptParams, ExportedKeys, OperationKind, to_data,
};

/// Borrowed view of an operation's result.
pub type Outcome<'a> = std::result::Result<(), &'a BridgeError>;

/// Takes the next layer and returns a new layer wrapping it.
pub type Middleware = Box<dyn FnOnce(SharedKeyService) -> SharedKeyService + Send>;

/// Non-sensitive description of one invocation: the operation plus the
/// identifiers a log line or alert may carry. Secret values only appear as
/// lengths.
#[derive(Debug, Clone)]
pub struct Call {
    operation: OperationKind,
    fields: Vec<(&'static str, String)>,
}

impl Call {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, name: &'static str, value: impl ToString) -> Self {
        self.fields.push((name, value.to_string()));
        self
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn fields(&self) -> &[(&'static str, String)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub trait Observer: Send + Sync + 'static {
    type Scope;

    fn enter(&self, ctx: &RequestContext, call: &Call) -> Self::Scope;

    /// Context handed to the inner layer; `None` passes the caller's through.
    fn inner_context(&self, _scope: &Self::Scope, _ctx: &RequestContext) -> Option<RequestContext> {
        None
    }

    fn exit(&self, scope: Self::Scope, call: &Call, outcome: Outcome<'_>);
}

pub struct Decorated<O> {
    observer: O,
    next: SharedKeyService,
}

impl<O: Observer> Decorated<O> {
    pub fn new(observer: O, next: SharedKeyService) -> Self {
        Self { observer, next }
    }

    fn around<T>(
        &self,
        ctx: &RequestContext,
        call: Call,
        op: impl FnOnce(&dyn KeyService, &RequestContext) -> Result<T>,
    ) -> Result<T> {
        let scope = self.observer.enter(ctx, &call);
        let inner_ctx = self.observer.inner_context(&scope, ctx);
        let result = op(self.next.as_ref(), inner_ctx.as_ref().unwrap_or(ctx));
        self.observer.exit(scope, &call, result.as_ref().map(|_| ()));
        result
    }
}

impl<O: Observer> KeyService for Decorated<O> {
    fn write_key(&self, ctx: &RequestContext, path: &str, value: &str) -> Result<()> {
        let call = Call::new(OperationKind::WriteKey)
            .with("path", path)
            .with("value_len", value.len());
        self.around(ctx, call, |next, ctx| next.write_key(ctx, path, value))
    }

    fn read_key(&self, ctx: &RequestContext, path: &str) -> Result<String> {
        let call = Call::new(OperationKind::ReadKey).with("path", path);
        self.around(ctx, call, |next, ctx| next.read_key(ctx, path))
    }

    fn create_key(
        &self,
        ctx: &RequestContext,
        name: &str,
        params: &CreateKeyParams,
    ) -> Result<()> {
        let call = Call::new(OperationKind::CreateKey)
            .with("keyname", name)
            .with("params", describe_params(params));
        self.around(ctx, call, |next, ctx| next.create_key(ctx, name, params))
    }

    fn export_key(&self, ctx: &RequestContext, path: &str) -> Result<ExportedKeys> {
        let call = Call::new(OperationKind::ExportKey).with("keypath", path);
        self.around(ctx, call, |next, ctx| next.export_key(ctx, path))
    }

    fn encrypt(&self, ctx: &RequestContext, name: &str, params: &EncryptParams) -> Result<String> {
        let mut call = Call::new(OperationKind::Encrypt)
            .with("keyname", name)
            .with("plaintext_len", params.plaintext.len());
        if let Some(version) = params.key_version {
            call = call.with("key_version", version);
        }
        self.around(ctx, call, |next, ctx| next.encrypt(ctx, name, params))
    }

    fn decrypt(&self, ctx: &RequestContext, name: &str, params: &DecryptParams) -> Result<String> {
        let call = Call::new(OperationKind::Decrypt)
            .with("keyname", name)
            .with("ciphertext_len", params.ciphertext.len());
        self.around(ctx, call, |next, ctx| next.decrypt(ctx, name, params))
    }
}

/// Wraps `observer` as a [`Middleware`].
pub fn layer<O: Observer>(observer: O) -> Middleware {
    Box::new(move |next| Arc::new(Decorated::new(observer, next)) as SharedKeyService)
}

/// Stacks `layers` (outermost first) around `inner`.
pub fn compose(inner: SharedKeyService, layers: Vec<Middleware>) -> SharedKeyService {
    layers
        .into_iter()
        .rev()
        .fold(inner, |next, layer| layer(next))
}

fn describe_params(params: &CreateKeyParams) -> String {
    to_data(OperationKind::CreateKey, params)
        .unwrap_or_default()
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
