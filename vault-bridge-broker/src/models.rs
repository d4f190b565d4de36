use serde::{Deserialize, Serialize};
use vault_bridge_core::{CreateKeyParams, DecryptParams, EncryptParams, ExportedKeys};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteKeyRequest {
    pub key: String,
}

/// Body of operations that return nothing but a possible error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadKeyResponse {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateKeyRequest {
    #[serde(default)]
    pub params: CreateKeyParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportKeyResponse {
    pub keys: Option<ExportedKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptRequest {
    pub params: EncryptParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptResponse {
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptRequest {
    pub params: DecryptParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecryptResponse {
    pub plaintext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}
