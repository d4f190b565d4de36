use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure of one bridge operation. Every layer returns these untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("policy registration failed: {0}")]
    PolicyRegistration(String),
    #[error("credential mint failed: {0}")]
    CredentialMint(String),
    #[error("store i/o failed: {0}")]
    StoreIo(String),
    #[error("{entity} could not be found")]
    NotFound { entity: String },
    #[error("{operation}: field `{field}` is missing or is not a {expected}")]
    Shape {
        operation: &'static str,
        field: &'static str,
        expected: &'static str,
    },
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Authorization(_) => "authorization",
            BridgeError::InvalidCredential(_) => "invalid_credential",
            BridgeError::PolicyRegistration(_) => "policy_registration",
            BridgeError::CredentialMint(_) => "credential_mint",
            BridgeError::StoreIo(_) => "store_io",
            BridgeError::NotFound { .. } => "not_found",
            BridgeError::Shape { .. } => "shape",
        }
    }

    pub fn authorization<T: Into<String>>(message: T) -> Self {
        BridgeError::Authorization(message.into())
    }

    pub fn invalid_credential<T: Into<String>>(message: T) -> Self {
        BridgeError::InvalidCredential(message.into())
    }
}

/// Error reported by a [`crate::store::SecretStore`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("backend error: {0}")]
    Backend(String),
}
