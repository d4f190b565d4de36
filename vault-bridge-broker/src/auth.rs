use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow};
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, header::AUTHORIZATION};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::hmac;
use serde::Deserialize;
use tracing::debug;
use vault_bridge_core::{BridgeError, CallerClaims};

use crate::config::AuthConfig;
use crate::error::{AppError, attach_correlation};
use crate::state::AppState;
use crate::telemetry::CorrelationId;

/// Outcome of bearer verification, attached to the request as an extension.
/// `None` means the credential was valid but carried no usable claims.
#[derive(Clone, Debug)]
pub struct Identity(pub Option<CallerClaims>);

#[derive(Clone)]
enum VerificationKey {
    Hmac(hmac::Key),
    Ed25519(Arc<Vec<u8>>),
}

impl VerificationKey {
    fn algorithm(&self) -> &'static str {
        match self {
            VerificationKey::Hmac(_) => "HS256",
            VerificationKey::Ed25519(_) => "EdDSA",
        }
    }

    fn verify(&self, signing_input: &[u8], signature: &[u8]) -> bool {
        match self {
            VerificationKey::Hmac(key) => hmac::verify(key, signing_input, signature).is_ok(),
            VerificationKey::Ed25519(key) => {
                ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, key.as_slice())
                    .verify(signing_input, signature)
                    .is_ok()
            }
        }
    }
}

/// Verifies compact JWS bearer credentials and decodes the caller claims.
#[derive(Clone)]
pub struct IdentityVerifier {
    key: VerificationKey,
    issuer: Option<String>,
    audience: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtHeaderParts {
    alg: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(value) => value == expected,
            Audience::Many(values) => values.iter().any(|value| value == expected),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    tenant: Option<String>,
    #[serde(default, alias = "resource_scope")]
    fil: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
}

impl IdentityVerifier {
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: VerificationKey::Hmac(hmac::Key::new(hmac::HMAC_SHA256, secret)),
            issuer: None,
            audience: None,
        }
    }

    pub fn ed25519(public_key: Vec<u8>) -> Self {
        Self {
            key: VerificationKey::Ed25519(Arc::new(public_key)),
            issuer: None,
            audience: None,
        }
    }

    pub fn with_issuer(mut self, issuer: Option<String>) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let verifier = match (&config.hmac_secret, &config.ed25519_public_key) {
            (Some(secret), None) => Self::hs256(secret.as_bytes()),
            (None, Some(key)) => {
                let raw = URL_SAFE_NO_PAD
                    .decode(key.trim().as_bytes())
                    .context("failed to decode auth.ed25519_public_key")?;
                if raw.len() != 32 {
                    return Err(anyhow!(
                        "auth.ed25519_public_key must be 32 bytes, got {}",
                        raw.len()
                    ));
                }
                Self::ed25519(raw)
            }
            (Some(_), Some(_)) => {
                return Err(anyhow!(
                    "only one of auth.hmac_secret or auth.ed25519_public_key may be set"
                ));
            }
            (None, None) => {
                return Err(anyhow!(
                    "auth.hmac_secret or auth.ed25519_public_key must be configured"
                ));
            }
        };
        Ok(verifier
            .with_issuer(config.issuer.clone())
            .with_audience(config.audience.clone()))
    }

    /// Verifies `token` and decodes its claims. Returns `Ok(None)` for a
    /// valid credential whose tenant or scope claim is missing or empty.
    pub fn verify_and_decode(&self, token: &str) -> Result<Option<CallerClaims>, BridgeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(BridgeError::invalid_credential("missing token"));
        }

        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(BridgeError::invalid_credential("invalid token format"));
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(segments[0].as_bytes())
            .map_err(|_| BridgeError::invalid_credential("invalid token header"))?;
        let header: JwtHeaderParts = serde_json::from_slice(&header_bytes)
            .map_err(|_| BridgeError::invalid_credential("invalid token header"))?;
        if header.alg != self.key.algorithm() {
            return Err(BridgeError::invalid_credential(format!(
                "unsupported signing algorithm `{}`",
                header.alg
            )));
        }

        let signing_input = format!(
            "{header}.{payload}",
            header = segments[0],
            payload = segments[1]
        );
        let signature = URL_SAFE_NO_PAD
            .decode(segments[2].as_bytes())
            .map_err(|_| BridgeError::invalid_credential("invalid token signature"))?;
        if !self.key.verify(signing_input.as_bytes(), &signature) {
            return Err(BridgeError::invalid_credential("signature verification failed"));
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(segments[1].as_bytes())
            .map_err(|_| BridgeError::invalid_credential("invalid token payload"))?;
        let claims: Claims = serde_json::from_slice(&payload_bytes)
            .map_err(|_| BridgeError::invalid_credential("invalid token payload"))?;

        self.validate_claims(&claims)?;

        match (claims.tenant, claims.fil) {
            (Some(tenant), Some(scope)) if !tenant.is_empty() && !scope.is_empty() => {
                Ok(Some(CallerClaims::new(tenant, scope)))
            }
            _ => {
                debug!("verified token carries no tenant scope");
                Ok(None)
            }
        }
    }

    fn validate_claims(&self, claims: &Claims) -> Result<(), BridgeError> {
        if let Some(exp) = claims.exp {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_secs(0))
                .as_secs() as i64;
            if exp < now {
                return Err(BridgeError::invalid_credential("token expired"));
            }
        }

        if let Some(expected) = &self.issuer {
            if claims.iss.as_deref() != Some(expected.as_str()) {
                return Err(BridgeError::invalid_credential("invalid issuer"));
            }
        }

        if let Some(expected) = &self.audience {
            if !claims.aud.as_ref().is_some_and(|aud| aud.contains(expected)) {
                return Err(BridgeError::invalid_credential("invalid audience"));
            }
        }

        Ok(())
    }
}

pub fn extract_bearer_token(value: &str) -> Option<&str> {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix("Bearer ") {
        Some(rest.trim())
    } else if let Some(rest) = value.strip_prefix("bearer ") {
        Some(rest.trim())
    } else {
        None
    }
}

pub async fn http_layer(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let correlation = req
        .extensions()
        .get::<CorrelationId>()
        .cloned()
        .unwrap_or_else(|| CorrelationId(String::new()));

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .map(str::to_owned);

    let Some(token) = token else {
        return attach_correlation(
            AppError::unauthorized("missing authorization header"),
            &correlation,
        )
        .into_response();
    };

    match state.verifier.verify_and_decode(&token) {
        Ok(claims) => {
            req.extensions_mut().insert(Identity(claims));
            next.run(req).await
        }
        Err(err) => attach_correlation(AppError::from(err), &correlation).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn sign_hs256(secret: &[u8], header: serde_json::Value, claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(header.to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let signing_input = format!("{header}.{payload}");
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        let signature = URL_SAFE_NO_PAD.encode(hmac::sign(&key, signing_input.as_bytes()));
        format!("{signing_input}.{signature}")
    }

    fn hs256(claims: serde_json::Value) -> String {
        sign_hs256(SECRET, json!({"alg": "HS256", "typ": "JWT"}), claims)
    }

    #[test]
    fn decodes_tenant_and_scope() {
        let verifier = IdentityVerifier::hs256(SECRET);
        let claims = verifier
            .verify_and_decode(&hs256(json!({"tenant": "rolex", "fil": "f1"})))
            .unwrap();
        assert_eq!(claims, Some(CallerClaims::new("rolex", "f1")));
    }

    #[test]
    fn wrong_secret_is_invalid_credential() {
        let verifier = IdentityVerifier::hs256(b"another-secret-another-secret-00");
        let err = verifier
            .verify_and_decode(&hs256(json!({"tenant": "rolex", "fil": "f1"})))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_credential");
    }

    #[test]
    fn algorithm_must_match_key() {
        let verifier = IdentityVerifier::hs256(SECRET);
        let token = sign_hs256(
            SECRET,
            json!({"alg": "none"}),
            json!({"tenant": "rolex", "fil": "f1"}),
        );
        assert!(verifier.verify_and_decode(&token).is_err());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let verifier = IdentityVerifier::hs256(SECRET);
        for token in ["", "abc", "a.b", "a.b.c", "!!!.???.***"] {
            let err = verifier.verify_and_decode(token).unwrap_err();
            assert_eq!(err.code(), "invalid_credential", "{token}");
        }
    }

    #[test]
    fn missing_or_empty_claims_yield_no_identity() {
        let verifier = IdentityVerifier::hs256(SECRET);
        for claims in [
            json!({}),
            json!({"tenant": "rolex"}),
            json!({"tenant": "", "fil": "f1"}),
        ] {
            assert_eq!(verifier.verify_and_decode(&hs256(claims)).unwrap(), None);
        }
    }

    #[test]
    fn expiry_issuer_and_audience_are_enforced() {
        let verifier = IdentityVerifier::hs256(SECRET)
            .with_issuer(Some("bridge-issuer".into()))
            .with_audience(Some("vault-bridge".into()));

        let expired = hs256(json!({
            "tenant": "rolex", "fil": "f1", "exp": 1,
            "iss": "bridge-issuer", "aud": "vault-bridge"
        }));
        assert!(verifier.verify_and_decode(&expired).is_err());

        let wrong_issuer = hs256(json!({
            "tenant": "rolex", "fil": "f1", "iss": "other", "aud": "vault-bridge"
        }));
        assert!(verifier.verify_and_decode(&wrong_issuer).is_err());

        let good = hs256(json!({
            "tenant": "rolex", "fil": "f1",
            "iss": "bridge-issuer", "aud": ["other", "vault-bridge"]
        }));
        assert!(verifier.verify_and_decode(&good).unwrap().is_some());
    }

    #[test]
    fn bearer_prefix_variants() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }

    #[test]
    fn config_requires_exactly_one_key() {
        assert!(IdentityVerifier::from_config(&AuthConfig::default()).is_err());
        let both = AuthConfig {
            hmac_secret: Some("s".into()),
            ed25519_public_key: Some(URL_SAFE_NO_PAD.encode([0u8; 32])),
            ..Default::default()
        };
        assert!(IdentityVerifier::from_config(&both).is_err());
        let short_key = AuthConfig {
            ed25519_public_key: Some(URL_SAFE_NO_PAD.encode([0u8; 8])),
            ..Default::default()
        };
        assert!(IdentityVerifier::from_config(&short_key).is_err());
    }
}
