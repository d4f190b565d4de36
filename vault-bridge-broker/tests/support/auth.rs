use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use vault_bridge_broker::config::{BackendKind, BridgeConfig};

pub const SECRET: &str = "integration-secret-0123456789abcdef";

/// Signs HS256 bearer tokens accepted by a broker built from [`TestAuth::config`].
pub struct TestAuth {
    encoding: EncodingKey,
}

impl TestAuth {
    pub fn new() -> Self {
        Self {
            encoding: EncodingKey::from_secret(SECRET.as_bytes()),
        }
    }

    /// Memory-backed config with tracing, metrics and alerting off.
    pub fn config(&self) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.backend = BackendKind::Memory;
        config.auth.hmac_secret = Some(SECRET.to_string());
        config.tracing.enabled = false;
        config
    }

    pub fn token(&self, tenant: &str, scope: &str) -> String {
        self.sign(json!({ "tenant": tenant, "fil": scope, "exp": now() + 3600 }))
    }

    #[allow(dead_code)]
    pub fn expired_token(&self, tenant: &str, scope: &str) -> String {
        self.sign(json!({ "tenant": tenant, "fil": scope, "exp": now() - 60 }))
    }

    /// Valid signature, no tenant claims.
    #[allow(dead_code)]
    pub fn anonymous_token(&self) -> String {
        self.sign(json!({ "sub": "svc", "exp": now() + 3600 }))
    }

    pub fn sign(&self, claims: Value) -> String {
        encode(&Header::default(), &claims, &self.encoding).expect("failed to encode test token")
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
