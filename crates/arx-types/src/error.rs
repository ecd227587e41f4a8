//! Error taxonomy for the Arx secrets service.
//!
//! Domain code returns `ArxError` and propagates with `?`. The error *kind*
//! is separate from any human-readable message: transports map kinds to
//! status codes and resolve messages at the edge, so no key identifiers,
//! plaintext, or stack traces ever cross the boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single failed validation on a named request field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ArxError {
    #[error("invalid argument: {message}")]
    InvalidArgument {
        message: String,
        fields: Vec<FieldViolation>,
    },

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Encryption is enabled but key material is absent or unreadable.
    #[error("encryption unavailable")]
    CryptoUnavailable,

    /// A ciphertext references a key version this engine does not hold.
    #[error("encryption key missing")]
    CryptoKeyMissing,

    /// GCM authentication failed; the ciphertext was tampered with or the
    /// wrong key was selected.
    #[error("ciphertext integrity check failed")]
    CryptoIntegrity,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`ArxError`], used for transport status mapping and for
/// audit records. Never carries payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    Expired,
    ResourceExhausted,
    CryptoUnavailable,
    CryptoKeyMissing,
    CryptoIntegrity,
    Conflict,
    Cancelled,
    Internal,
}

impl ArxError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn invalid_fields(message: impl Into<String>, fields: Vec<FieldViolation>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            fields,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn expired(what: impl Into<String>) -> Self {
        Self::Expired(what.into())
    }

    pub fn resource_exhausted(what: impl Into<String>) -> Self {
        Self::ResourceExhausted(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Expired(_) => ErrorKind::Expired,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::CryptoUnavailable => ErrorKind::CryptoUnavailable,
            Self::CryptoKeyMissing => ErrorKind::CryptoKeyMissing,
            Self::CryptoIntegrity => ErrorKind::CryptoIntegrity,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Field violations attached to an `InvalidArgument`, empty otherwise.
    pub fn field_violations(&self) -> &[FieldViolation] {
        match self {
            Self::InvalidArgument { fields, .. } => fields,
            _ => &[],
        }
    }
}

impl ErrorKind {
    /// Stable machine-readable code, also the message-catalog key suffix.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Expired => "expired",
            Self::ResourceExhausted => "resource_exhausted",
            Self::CryptoUnavailable => "crypto_unavailable",
            Self::CryptoKeyMissing => "crypto_key_missing",
            Self::CryptoIntegrity => "crypto_integrity",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, ArxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            ArxError::invalid_argument("bad").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(ArxError::CryptoIntegrity.kind(), ErrorKind::CryptoIntegrity);
        assert_eq!(
            ArxError::not_found("secret 9").kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn crypto_errors_carry_no_detail() {
        // The Display impl must not leak which key or version was involved.
        assert_eq!(ArxError::CryptoKeyMissing.to_string(), "encryption key missing");
        assert_eq!(ArxError::CryptoUnavailable.to_string(), "encryption unavailable");
    }

    #[test]
    fn field_violations_only_on_invalid_argument() {
        let err = ArxError::invalid_fields(
            "validation failed",
            vec![FieldViolation::new("name", "must not be empty")],
        );
        assert_eq!(err.field_violations().len(), 1);
        assert!(ArxError::Cancelled.field_violations().is_empty());
    }
}
