use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{BridgeError, Result};

/// Trusted caller attributes decoded from a verified bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerClaims {
    pub tenant: String,
    #[serde(rename = "fil", alias = "resource_scope")]
    pub resource_scope: String,
}

impl CallerClaims {
    pub fn new(tenant: impl Into<String>, resource_scope: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            resource_scope: resource_scope.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Read => "read",
            Capability::Write => "write",
        }
    }
}

/// The six operations exposed by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    WriteKey,
    ReadKey,
    CreateKey,
    ExportKey,
    Encrypt,
    Decrypt,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::WriteKey,
        OperationKind::ReadKey,
        OperationKind::CreateKey,
        OperationKind::ExportKey,
        OperationKind::Encrypt,
        OperationKind::Decrypt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::WriteKey => "writekey",
            OperationKind::ReadKey => "readkey",
            OperationKind::CreateKey => "createkey",
            OperationKind::ExportKey => "exportkey",
            OperationKind::Encrypt => "encrypt",
            OperationKind::Decrypt => "decrypt",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named capability grant over a path pattern, valid for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicySpec {
    pub path_pattern: String,
    pub capability: Capability,
    pub name: String,
}

impl PolicySpec {
    /// Whether `path` falls under this policy's pattern. A trailing `*`
    /// matches any suffix; anything else must match exactly.
    pub fn covers(&self, path: &str) -> bool {
        match self.path_pattern.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == self.path_pattern,
        }
    }
}

/// Opaque token minted for exactly one policy. Never printed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Key/value payload returned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRecord {
    data: Map<String, Value>,
}

impl SecretRecord {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn into_data(self) -> Map<String, Value> {
        self.data
    }

    pub fn string_field(&self, operation: OperationKind, field: &'static str) -> Result<String> {
        match self.data.get(field) {
            Some(Value::String(value)) => Ok(value.clone()),
            _ => Err(BridgeError::Shape {
                operation: operation.as_str(),
                field,
                expected: "string",
            }),
        }
    }

    pub fn map_field(
        &self,
        operation: OperationKind,
        field: &'static str,
    ) -> Result<Map<String, Value>> {
        match self.data.get(field) {
            Some(Value::Object(value)) => Ok(value.clone()),
            _ => Err(BridgeError::Shape {
                operation: operation.as_str(),
                field,
                expected: "mapping",
            }),
        }
    }
}

impl From<Map<String, Value>> for SecretRecord {
    fn from(data: Map<String, Value>) -> Self {
        Self::new(data)
    }
}

pub type ExportedKeys = Map<String, Value>;

/// Options for creating a transit key. Fields the bridge does not inspect
/// are carried in `extra` and forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateKeyParams {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exportable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergent_encryption: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptParams {
    pub plaintext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecryptParams {
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Serialises typed parameters into the mapping handed to the store.
/// Anything that does not serialise to a JSON object is a `Shape` error.
pub fn to_data<T: Serialize>(kind: OperationKind, params: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(params) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(BridgeError::Shape {
            operation: kind.as_str(),
            field: "params",
            expected: "object",
        }),
    }
}
