//! HashiCorp Vault implementation of the bridge's [`SecretStore`].
//!
//! Policies are written as ACL policies under `sys/policies/acl`, credentials
//! are child tokens created through `auth/token/create` bound to exactly one
//! policy, and reads/writes go to the generic logical API (`v1/<path>`), which
//! covers both KV mounts and the transit engine.
//!
//! The client is synchronous (`reqwest::blocking`); async callers should run
//! it on a blocking thread.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use vault_bridge_core::{
    Capability, Credential, PolicySpec, SecretRecord, SecretStore, StoreError, StoreResult,
};

pub const DEFAULT_ADDR: &str = "http://127.0.0.1:8200";
pub const DEFAULT_TOKEN_TTL: &str = "60s";
/// Each request spends its credential on exactly one store call.
pub const DEFAULT_TOKEN_NUM_USES: u64 = 1;
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Clone)]
pub struct VaultConfig {
    pub addr: String,
    /// Token used to manage policies and create child tokens.
    pub token: String,
    pub namespace: Option<String>,
    pub timeout: Duration,
    /// Lifetime of minted credentials, in Vault duration syntax.
    pub token_ttl: String,
    /// Uses allowed per minted credential; 0 means unlimited.
    pub token_num_uses: u64,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("addr", &self.addr)
            .field("token", &"***")
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .field("token_ttl", &self.token_ttl)
            .field("token_num_uses", &self.token_num_uses)
            .finish()
    }
}

impl VaultConfig {
    pub fn new(addr: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            token: token.into(),
            namespace: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            token_ttl: DEFAULT_TOKEN_TTL.to_string(),
            token_num_uses: DEFAULT_TOKEN_NUM_USES,
        }
    }

    fn build_http_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build Vault HTTP client")
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.addr.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

pub struct VaultStore {
    config: VaultConfig,
    client: Client,
}

impl VaultStore {
    pub fn new(config: VaultConfig) -> Result<Self> {
        let client = config.build_http_client()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<Value>,
    ) -> StoreResult<Response> {
        let mut builder = self
            .client
            .request(method, self.config.url(path))
            .header("X-Vault-Token", token);
        if let Some(namespace) = &self.config.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        if let Some(payload) = body {
            builder = builder.json(&payload);
        }
        builder
            .send()
            .map_err(|err| StoreError::Backend(format!("vault request failed: {err}")))
    }
}

impl SecretStore for VaultStore {
    fn create_policy(&self, policy: &PolicySpec) -> StoreResult<()> {
        let path = format!("sys/policies/acl/{}", policy.name);
        let body = json!({ "policy": render_policy(policy) });
        let response = self.request(Method::PUT, &path, &self.config.token, Some(body))?;
        expect_success(response, "create policy")?;
        debug!(policy = %policy.name, pattern = %policy.path_pattern, "vault policy written");
        Ok(())
    }

    fn mint_credential(&self, policy_name: &str) -> StoreResult<Credential> {
        let body = json!({
            "policies": [policy_name],
            "ttl": self.config.token_ttl,
            "num_uses": self.config.token_num_uses,
            "renewable": false,
        });
        let response = self.request(
            Method::POST,
            "auth/token/create",
            &self.config.token,
            Some(body),
        )?;
        let body = expect_success(response, "create token")?;
        let parsed: TokenCreateResponse = serde_json::from_str(&body).map_err(|err| {
            StoreError::Backend(format!("failed to decode vault token response: {err}"))
        })?;
        Ok(Credential::new(parsed.auth.client_token))
    }

    fn read(&self, path: &str, credential: &Credential) -> StoreResult<Option<SecretRecord>> {
        let response = self.request(Method::GET, path, credential.expose(), None)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = expect_success(response, "read")?;
        let parsed: LogicalResponse = serde_json::from_str(&body).map_err(|err| {
            StoreError::Backend(format!("failed to decode vault read response: {err}"))
        })?;
        Ok(parsed.data.map(SecretRecord::new))
    }

    fn write(
        &self,
        path: &str,
        data: Map<String, Value>,
        credential: &Credential,
    ) -> StoreResult<SecretRecord> {
        let response = self.request(
            Method::POST,
            path,
            credential.expose(),
            Some(Value::Object(data)),
        )?;
        let body = expect_success(response, "write")?;
        if body.trim().is_empty() {
            return Ok(SecretRecord::default());
        }
        let parsed: LogicalResponse = serde_json::from_str(&body).map_err(|err| {
            StoreError::Backend(format!("failed to decode vault write response: {err}"))
        })?;
        Ok(parsed.data.map(SecretRecord::new).unwrap_or_default())
    }
}

/// Renders `policy` as a Vault HCL ACL policy with a single path stanza.
pub fn render_policy(policy: &PolicySpec) -> String {
    let capabilities = match policy.capability {
        Capability::Read => r#"["read"]"#,
        Capability::Write => r#"["create", "update"]"#,
    };
    format!(
        "path \"{pattern}\" {{\n  capabilities = {capabilities}\n}}\n",
        pattern = policy.path_pattern
    )
}

fn expect_success(response: Response, action: &str) -> StoreResult<String> {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    if status.is_success() {
        return Ok(body);
    }
    let detail = serde_json::from_str::<ErrorResponse>(&body)
        .map(|parsed| parsed.errors.join("; "))
        .unwrap_or(body);
    let message = format!("{action} failed: {status} {detail}");
    if status == StatusCode::FORBIDDEN {
        Err(StoreError::PermissionDenied(message))
    } else {
        Err(StoreError::Backend(message))
    }
}

#[derive(Deserialize)]
struct LogicalResponse {
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct TokenCreateResponse {
    auth: TokenAuth,
}

#[derive(Deserialize)]
struct TokenAuth {
    client_token: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}
