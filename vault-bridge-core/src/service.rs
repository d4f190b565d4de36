use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::authz;
use crate::context::RequestContext;
use crate::errors::{BridgeError, Result};
use crate::store::SecretStore;
use crate::types::{
    CreateKeyParams, Credential, DecryptParams, EncryptParams, ExportedKeys, OperationKind,
    SecretRecord, to_data,
};

/// The operation set shared by the core service and every decorator.
pub trait KeyService: Send + Sync {
    fn write_key(&self, ctx: &RequestContext, path: &str, value: &str) -> Result<()>;
    fn read_key(&self, ctx: &RequestContext, path: &str) -> Result<String>;
    fn create_key(
        &self,
        ctx: &RequestContext,
        name: &str,
        params: &CreateKeyParams,
    ) -> Result<()>;
    fn export_key(&self, ctx: &RequestContext, path: &str) -> Result<ExportedKeys>;
    fn encrypt(&self, ctx: &RequestContext, name: &str, params: &EncryptParams) -> Result<String>;
    fn decrypt(&self, ctx: &RequestContext, name: &str, params: &DecryptParams) -> Result<String>;
}

pub type SharedKeyService = Arc<dyn KeyService>;

/// Resolves a policy, mints a credential for it and performs exactly one
/// store call. Nothing is cached between requests.
pub struct BasicKeyService<S> {
    store: S,
}

struct Grant {
    path: String,
    credential: Credential,
}

impl<S: SecretStore> BasicKeyService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn grant(&self, ctx: &RequestContext, kind: OperationKind, target: &str) -> Result<Grant> {
        let policy = authz::derive(kind, ctx.claims())?;
        let path = authz::target_path(kind, &policy, target)?;

        self.store
            .create_policy(&policy)
            .map_err(|err| BridgeError::PolicyRegistration(err.to_string()))?;
        let credential = self
            .store
            .mint_credential(&policy.name)
            .map_err(|err| BridgeError::CredentialMint(err.to_string()))?;
        debug!(operation = %kind, policy = %policy.name, %path, "credential minted");

        Ok(Grant { path, credential })
    }

    fn read(&self, kind: OperationKind, grant: &Grant) -> Result<SecretRecord> {
        self.store
            .read(&grant.path, &grant.credential)
            .map_err(|err| BridgeError::StoreIo(err.to_string()))?
            .ok_or_else(|| BridgeError::NotFound {
                entity: format!("{kind} record at `{path}`", path = grant.path),
            })
    }

    fn write(&self, grant: &Grant, data: Map<String, Value>) -> Result<SecretRecord> {
        self.store
            .write(&grant.path, data, &grant.credential)
            .map_err(|err| BridgeError::StoreIo(err.to_string()))
    }
}

impl<S: SecretStore> KeyService for BasicKeyService<S> {
    fn write_key(&self, ctx: &RequestContext, path: &str, value: &str) -> Result<()> {
        let grant = self.grant(ctx, OperationKind::WriteKey, path)?;
        let mut data = Map::new();
        data.insert("key".into(), Value::String(value.to_string()));
        self.write(&grant, data).map(|_| ())
    }

    fn read_key(&self, ctx: &RequestContext, path: &str) -> Result<String> {
        let kind = OperationKind::ReadKey;
        let grant = self.grant(ctx, kind, path)?;
        // by convention the value lives under "key"
        self.read(kind, &grant)?.string_field(kind, "key")
    }

    fn create_key(
        &self,
        ctx: &RequestContext,
        name: &str,
        params: &CreateKeyParams,
    ) -> Result<()> {
        let kind = OperationKind::CreateKey;
        let data = to_data(kind, params)?;
        let grant = self.grant(ctx, kind, name)?;
        self.write(&grant, data).map(|_| ())
    }

    fn export_key(&self, ctx: &RequestContext, path: &str) -> Result<ExportedKeys> {
        let kind = OperationKind::ExportKey;
        let grant = self.grant(ctx, kind, path)?;
        self.read(kind, &grant)?.map_field(kind, "keys")
    }

    fn encrypt(&self, ctx: &RequestContext, name: &str, params: &EncryptParams) -> Result<String> {
        let kind = OperationKind::Encrypt;
        let data = to_data(kind, params)?;
        let grant = self.grant(ctx, kind, name)?;
        self.write(&grant, data)?.string_field(kind, "ciphertext")
    }

    fn decrypt(&self, ctx: &RequestContext, name: &str, params: &DecryptParams) -> Result<String> {
        let kind = OperationKind::Decrypt;
        let data = to_data(kind, params)?;
        let grant = self.grant(ctx, kind, name)?;
        self.write(&grant, data)?.string_field(kind, "plaintext")
    }
}
