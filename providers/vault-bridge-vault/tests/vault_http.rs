use std::sync::Arc;

use serde_json::{Map, Value, json};
use vault_bridge_core::{Capability, Credential, PolicySpec, SecretStore, StoreError};
use vault_bridge_vault::{VaultConfig, VaultStore};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn store_for(server: &MockServer) -> Arc<VaultStore> {
    let mut config = VaultConfig::new(server.uri(), "root-token");
    config.namespace = Some("team-a".into());
    tokio::task::spawn_blocking(move || VaultStore::new(config).map(Arc::new))
        .await
        .expect("join")
        .expect("client")
}

/// Runs a blocking store call off the async runtime.
async fn blocking<T, F>(store: &Arc<VaultStore>, call: F) -> T
where
    T: Send + 'static,
    F: FnOnce(&VaultStore) -> T + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || call(&store))
        .await
        .expect("join")
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread")]
async fn create_policy_puts_acl_with_management_token() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/policies/acl/readkey_rolex_f1"))
        .and(header("X-Vault-Token", "root-token"))
        .and(header("X-Vault-Namespace", "team-a"))
        .and(body_json(json!({
            "policy": "path \"tenants/rolex/f1/*\" {\n  capabilities = [\"read\"]\n}\n"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    let policy = PolicySpec {
        path_pattern: "tenants/rolex/f1/*".into(),
        capability: Capability::Read,
        name: "readkey_rolex_f1".into(),
    };
    blocking(&store, move |store| store.create_policy(&policy))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn mint_credential_returns_client_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/token/create"))
        .and(body_json(json!({
            "policies": ["createkey"],
            "ttl": "60s",
            "num_uses": 1,
            "renewable": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": {"client_token": "s.child", "policies": ["createkey"]}
        })))
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    let credential = blocking(&store, |store| store.mint_credential("createkey"))
        .await
        .unwrap();
    assert_eq!(credential.expose(), "s.child");
}

#[tokio::test(flavor = "multi_thread")]
async fn read_uses_minted_credential_and_unwraps_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/tenants/rolex/f1/key1"))
        .and(header("X-Vault-Token", "s.child"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"key": "abcdef"}})),
        )
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    let record = blocking(&store, |store| {
        store.read("tenants/rolex/f1/key1", &Credential::new("s.child"))
    })
    .await
    .unwrap()
    .expect("record");
    assert_eq!(record.data().get("key"), Some(&json!("abcdef")));
}

#[tokio::test(flavor = "multi_thread")]
async fn read_of_missing_path_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/tenants/rolex/f1/none"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    let record = blocking(&store, |store| {
        store.read("tenants/rolex/f1/none", &Credential::new("s.child"))
    })
    .await
    .unwrap();
    assert!(record.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn write_without_body_returns_empty_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/transit/keys/key1"))
        .and(body_json(json!({"type": "aes256-gcm96", "exportable": true})))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    let record = blocking(&store, |store| {
        store.write(
            "transit/keys/key1",
            object(json!({"type": "aes256-gcm96", "exportable": true})),
            &Credential::new("s.child"),
        )
    })
    .await
    .unwrap();
    assert!(record.data().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn write_returns_transit_response_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/transit/encrypt/key1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"ciphertext": "vault:v1:abc", "key_version": 1}
        })))
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    let record = blocking(&store, |store| {
        store.write(
            "transit/encrypt/key1",
            object(json!({"plaintext": "YWJjZA=="})),
            &Credential::new("s.child"),
        )
    })
    .await
    .unwrap();
    assert_eq!(record.data().get("ciphertext"), Some(&json!("vault:v1:abc")));
}

#[tokio::test(flavor = "multi_thread")]
async fn forbidden_maps_to_permission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/tenants/omega/f1/key1"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"errors": ["permission denied"]})),
        )
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    let err = blocking(&store, |store| {
        store.read("tenants/omega/f1/key1", &Credential::new("s.child"))
    })
    .await
    .unwrap_err();
    match err {
        StoreError::PermissionDenied(message) => assert!(message.contains("permission denied")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_map_to_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/token/create"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    let err = blocking(&store, |store| store.mint_credential("createkey"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Backend(message) if message.contains("500")));
}
