pub mod memory;

use serde_json::{Map, Value};

use crate::errors::StoreError;
use crate::types::{Credential, PolicySpec, SecretRecord};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Narrow capability interface onto the backing secret store.
///
/// Implementations must be safe for concurrent use by simultaneous requests.
pub trait SecretStore: Send + Sync {
    /// Registers `policy`. Registering an identical definition again is a no-op.
    fn create_policy(&self, policy: &PolicySpec) -> StoreResult<()>;
    fn mint_credential(&self, policy_name: &str) -> StoreResult<Credential>;
    /// `Ok(None)` when nothing is stored at `path`.
    fn read(&self, path: &str, credential: &Credential) -> StoreResult<Option<SecretRecord>>;
    /// Returns the store's response payload; empty when it sends none.
    fn write(
        &self,
        path: &str,
        data: Map<String, Value>,
        credential: &Credential,
    ) -> StoreResult<SecretRecord>;
}

impl<T> SecretStore for Box<T>
where
    T: SecretStore + ?Sized,
{
    fn create_policy(&self, policy: &PolicySpec) -> StoreResult<()> {
        (**self).create_policy(policy)
    }
    fn mint_credential(&self, policy_name: &str) -> StoreResult<Credential> {
        (**self).mint_credential(policy_name)
    }
    fn read(&self, path: &str, credential: &Credential) -> StoreResult<Option<SecretRecord>> {
        (**self).read(path, credential)
    }
    fn write(
        &self,
        path: &str,
        data: Map<String, Value>,
        credential: &Credential,
    ) -> StoreResult<SecretRecord> {
        (**self).write(path, data, credential)
    }
}

impl<T> SecretStore for std::sync::Arc<T>
where
    T: SecretStore + ?Sized,
{
    fn create_policy(&self, policy: &PolicySpec) -> StoreResult<()> {
        (**self).create_policy(policy)
    }
    fn mint_credential(&self, policy_name: &str) -> StoreResult<Credential> {
        (**self).mint_credential(policy_name)
    }
    fn read(&self, path: &str, credential: &Credential) -> StoreResult<Option<SecretRecord>> {
        (**self).read(path, credential)
    }
    fn write(
        &self,
        path: &str,
        data: Map<String, Value>,
        credential: &Credential,
    ) -> StoreResult<SecretRecord> {
        (**self).write(path, data, credential)
    }
}
