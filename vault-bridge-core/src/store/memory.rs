//! In-process secret store for development and tests.
//!
//! Mirrors the subset of the Vault HTTP API the bridge relies on: ACL
//! policies, policy-bound tokens, generic KV paths and the transit engine.
//! Transit is simulated with per-key random material and a reversible
//! keystream so that no real cryptography is needed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{SecretStore, StoreResult};
use crate::authz::{TRANSIT_DECRYPT, TRANSIT_ENCRYPT, TRANSIT_EXPORT, TRANSIT_KEYS};
use crate::errors::StoreError;
use crate::types::{Capability, Credential, PolicySpec, SecretRecord};

const DEFAULT_KEY_TYPE: &str = "aes256-gcm96";
const KEY_LEN: usize = 32;
const TOKEN_TTL: Duration = Duration::from_secs(60);
const TOKEN_USES: u32 = 1;

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    policies: HashMap<String, PolicySpec>,
    tokens: HashMap<String, Lease>,
    kv: HashMap<String, Map<String, Value>>,
    transit: HashMap<String, TransitKey>,
}

/// A minted token. It is dropped once its uses run out, and expired leases
/// are pruned on every mint.
struct Lease {
    policy: String,
    expires_at: Instant,
    uses_left: u32,
}

struct TransitKey {
    key_type: String,
    exportable: bool,
    versions: Vec<Vec<u8>>,
}

impl TransitKey {
    fn generate(key_type: String, exportable: bool) -> Self {
        Self {
            key_type,
            exportable,
            versions: vec![random_key()],
        }
    }

    fn latest_version(&self) -> usize {
        self.versions.len()
    }

    fn material(&self, version: usize) -> Option<&[u8]> {
        version
            .checked_sub(1)
            .and_then(|index| self.versions.get(index))
            .map(Vec::as_slice)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn policy_count(&self) -> usize {
        self.lock().map(|state| state.policies.len()).unwrap_or(0)
    }

    #[cfg(test)]
    fn live_tokens(&self) -> usize {
        self.lock().map(|state| state.tokens.len()).unwrap_or(0)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

impl State {
    /// Checks `credential` against `path` and spends one of its uses.
    fn authorize(
        &mut self,
        credential: &Credential,
        path: &str,
        capability: Capability,
    ) -> StoreResult<()> {
        let now = Instant::now();
        let Some(mut lease) = self
            .tokens
            .remove(credential.expose())
            .filter(|lease| lease.expires_at > now)
        else {
            return Err(StoreError::PermissionDenied(
                "unknown, expired or exhausted token".into(),
            ));
        };

        let outcome = match self.policies.get(&lease.policy) {
            Some(policy) if policy.capability == capability && policy.covers(path) => Ok(()),
            Some(policy) => Err(StoreError::PermissionDenied(format!(
                "policy `{name}` does not grant {cap} on `{path}`",
                name = policy.name,
                cap = capability.as_str()
            ))),
            None => Err(StoreError::PermissionDenied(format!(
                "policy `{}` no longer exists",
                lease.policy
            ))),
        };

        lease.uses_left = lease.uses_left.saturating_sub(1);
        if lease.uses_left > 0 {
            self.tokens.insert(credential.expose().to_string(), lease);
        }
        outcome
    }

    fn create_transit_key(&mut self, name: &str, data: &Map<String, Value>) {
        if self.transit.contains_key(name) {
            return;
        }
        let key_type = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_KEY_TYPE)
            .to_string();
        let exportable = data
            .get("exportable")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.transit
            .insert(name.to_string(), TransitKey::generate(key_type, exportable));
    }

    fn encrypt(&mut self, name: &str, data: &Map<String, Value>) -> StoreResult<SecretRecord> {
        let plaintext = data
            .get("plaintext")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Backend("missing plaintext to encrypt".into()))?;
        let plaintext = STANDARD
            .decode(plaintext.as_bytes())
            .map_err(|_| StoreError::Backend("plaintext must be base64 encoded".into()))?;
        let key = self
            .transit
            .entry(name.to_string())
            .or_insert_with(|| TransitKey::generate(DEFAULT_KEY_TYPE.into(), false));
        let version = match data.get("key_version").and_then(Value::as_u64) {
            Some(version) => version as usize,
            None => key.latest_version(),
        };
        let material = key
            .material(version)
            .ok_or_else(|| StoreError::Backend(format!("key version {version} does not exist")))?;
        let sealed = keystream(material, &plaintext);
        let ciphertext = format!("vault:v{version}:{}", STANDARD.encode(sealed));
        Ok(record(json!({ "ciphertext": ciphertext, "key_version": version })))
    }

    fn decrypt(&self, name: &str, data: &Map<String, Value>) -> StoreResult<SecretRecord> {
        let ciphertext = data
            .get("ciphertext")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Backend("missing ciphertext to decrypt".into()))?;
        let (version, body) = parse_ciphertext(ciphertext)?;
        let key = self
            .transit
            .get(name)
            .ok_or_else(|| StoreError::Backend(format!("encryption key `{name}` not found")))?;
        let material = key
            .material(version)
            .ok_or_else(|| StoreError::Backend(format!("key version {version} does not exist")))?;
        let plaintext = keystream(material, &body);
        Ok(record(json!({ "plaintext": STANDARD.encode(plaintext) })))
    }

    fn export(&self, target: &str) -> StoreResult<Option<SecretRecord>> {
        let mut segments = target.split('/');
        if segments.next() != Some("encryption-key") {
            return Ok(None);
        }
        let Some(name) = segments.next() else {
            return Ok(None);
        };
        let version = segments.next().map(str::parse::<usize>);
        let Some(key) = self.transit.get(name) else {
            return Ok(None);
        };
        if !key.exportable {
            return Err(StoreError::Backend(format!("key `{name}` is not exportable")));
        }
        let mut keys = Map::new();
        match version {
            Some(Ok(version)) => match key.material(version) {
                Some(material) => {
                    keys.insert(version.to_string(), Value::String(STANDARD.encode(material)));
                }
                None => return Ok(None),
            },
            Some(Err(_)) => return Ok(None),
            None => {
                for (index, material) in key.versions.iter().enumerate() {
                    keys.insert((index + 1).to_string(), Value::String(STANDARD.encode(material)));
                }
            }
        }
        Ok(Some(record(json!({
            "name": name,
            "type": key.key_type,
            "keys": keys,
        }))))
    }
}

impl SecretStore for MemoryStore {
    fn create_policy(&self, policy: &PolicySpec) -> StoreResult<()> {
        let mut state = self.lock()?;
        match state.policies.get(&policy.name) {
            Some(existing) if existing == policy => {}
            _ => {
                debug!(policy = %policy.name, pattern = %policy.path_pattern, "memory store registering policy");
                state.policies.insert(policy.name.clone(), policy.clone());
            }
        }
        Ok(())
    }

    fn mint_credential(&self, policy_name: &str) -> StoreResult<Credential> {
        let mut state = self.lock()?;
        if !state.policies.contains_key(policy_name) {
            return Err(StoreError::Backend(format!(
                "policy `{policy_name}` does not exist"
            )));
        }
        let now = Instant::now();
        state.tokens.retain(|_, lease| lease.expires_at > now);
        let token = format!("mem.{:032x}", rand::random::<u128>());
        state.tokens.insert(
            token.clone(),
            Lease {
                policy: policy_name.to_string(),
                expires_at: now + TOKEN_TTL,
                uses_left: TOKEN_USES,
            },
        );
        Ok(Credential::new(token))
    }

    fn read(&self, path: &str, credential: &Credential) -> StoreResult<Option<SecretRecord>> {
        let mut state = self.lock()?;
        state.authorize(credential, path, Capability::Read)?;
        if let Some(target) = strip_namespace(path, TRANSIT_EXPORT) {
            return state.export(target);
        }
        Ok(state.kv.get(path).cloned().map(SecretRecord::new))
    }

    fn write(
        &self,
        path: &str,
        data: Map<String, Value>,
        credential: &Credential,
    ) -> StoreResult<SecretRecord> {
        let mut state = self.lock()?;
        state.authorize(credential, path, Capability::Write)?;
        if let Some(name) = strip_namespace(path, TRANSIT_KEYS) {
            state.create_transit_key(name, &data);
            return Ok(SecretRecord::default());
        }
        if let Some(name) = strip_namespace(path, TRANSIT_ENCRYPT) {
            return state.encrypt(name, &data);
        }
        if let Some(name) = strip_namespace(path, TRANSIT_DECRYPT) {
            return state.decrypt(name, &data);
        }
        state.kv.insert(path.to_string(), data);
        Ok(SecretRecord::default())
    }
}

fn strip_namespace<'a>(path: &'a str, namespace: &str) -> Option<&'a str> {
    path.strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
}

fn record(value: Value) -> SecretRecord {
    match value {
        Value::Object(map) => SecretRecord::new(map),
        _ => SecretRecord::default(),
    }
}

fn random_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_LEN];
    rand::rng().fill(key.as_mut_slice());
    key
}

fn keystream(key: &[u8], input: &[u8]) -> Vec<u8> {
    input
        .iter()
        .zip(key.iter().cycle())
        .map(|(byte, k)| byte ^ k)
        .collect()
}

fn parse_ciphertext(ciphertext: &str) -> StoreResult<(usize, Vec<u8>)> {
    let invalid = || StoreError::Backend("invalid ciphertext".into());
    let rest = ciphertext.strip_prefix("vault:v").ok_or_else(invalid)?;
    let (version, body) = rest.split_once(':').ok_or_else(invalid)?;
    let version = version.parse::<usize>().map_err(|_| invalid())?;
    let body = STANDARD.decode(body.as_bytes()).map_err(|_| invalid())?;
    Ok((version, body))
}
