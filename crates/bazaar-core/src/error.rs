//! Error types for the Bazaar data layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of failure kinds a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    ValidationFailed,
    NetworkError,
    TokenNotProvisioned,
    AlreadyResolved,
    Unknown,
}

/// A shared error type for every Bazaar component.
///
/// Errors are plain values: they are cloned into subscription callbacks and
/// serialized across to the UI layer, so every variant carries owned data only.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BazaarError {
    /// Record (or amendment) not found in the addressed collection
    #[error("Record not found: {collection} '{id}'")]
    NotFound { collection: String, id: String },

    /// The attached credential was rejected or lacks access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Input did not conform to the collection schema or a caller contract
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Transport failure talking to the backend or credential endpoint
    #[error("Network error: {0}")]
    Network(String),

    /// Identity exists but its backend record has not been created yet
    #[error("Token not provisioned for identity")]
    TokenNotProvisioned,

    /// Amendment already left the Waiting state
    #[error("Amendment '{amendment_id}' is already resolved")]
    AlreadyResolved { amendment_id: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Anything the backend reports that does not fit another kind
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl BazaarError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown(message.into())
    }

    pub fn already_resolved(amendment_id: impl Into<String>) -> Self {
        Self::AlreadyResolved {
            amendment_id: amendment_id.into(),
        }
    }

    // ============================================================================
    // Classification
    // ============================================================================

    /// Maps this error onto the closed [`ErrorKind`] set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::Network(_) => ErrorKind::NetworkError,
            Self::TokenNotProvisioned => ErrorKind::TokenNotProvisioned,
            Self::AlreadyResolved { .. } => ErrorKind::AlreadyResolved,
            Self::Config(_) | Self::Serialization { .. } | Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the failure should trigger a token refresh-and-retry.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    pub fn is_already_resolved(&self) -> bool {
        matches!(self, Self::AlreadyResolved { .. })
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for BazaarError {
    fn from(err: std::io::Error) -> Self {
        Self::Config(format!("{} (kind: {:?})", err, err.kind()))
    }
}

impl From<serde_json::Error> for BazaarError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for BazaarError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// Conversion from anyhow::Error for collaborators that still report through anyhow
impl From<anyhow::Error> for BazaarError {
    fn from(err: anyhow::Error) -> Self {
        Self::Unknown(err.to_string())
    }
}

/// A type alias for `Result<T, BazaarError>`.
pub type Result<T> = std::result::Result<T, BazaarError>;
