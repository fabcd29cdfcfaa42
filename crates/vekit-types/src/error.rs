//! Validation, codec, and store errors plus the user-facing error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid length for {kind}: expected {expected}, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
    #[error("unknown gas token `{0}`")]
    UnknownToken(String),
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("rlp: {0}")]
    Rlp(String),
    #[error("invalid signature length {0}")]
    SignatureLength(usize),
    #[error("cannot recover signer: {0}")]
    Recovery(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt value for key `{key}`: {message}")]
    Corrupt { key: String, message: String },
}

/// Category of a terminal transaction error. Drives "try again" decisions in UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UserRejection,
    NetworkError,
    ConfigurationError,
    ProviderError,
    Unknown,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UserRejection | Self::ConfigurationError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRejection => "user_rejection",
            Self::NetworkError => "network_error",
            Self::ConfigurationError => "configuration_error",
            Self::ProviderError => "provider_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCategory;

    #[test]
    fn retryability_follows_category() {
        assert!(!ErrorCategory::UserRejection.is_retryable());
        assert!(!ErrorCategory::ConfigurationError.is_retryable());
        assert!(ErrorCategory::NetworkError.is_retryable());
        assert!(ErrorCategory::ProviderError.is_retryable());
        assert!(ErrorCategory::Unknown.is_retryable());
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::ProviderError).unwrap();
        assert_eq!(json, "\"provider_error\"");
    }
}
