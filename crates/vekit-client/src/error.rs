//! User-facing transaction errors and their classification.

use serde::{Deserialize, Serialize};
use vekit_types::{ErrorCategory, ValidationError};

use crate::{
    authorization::AuthorizationError, chain::ChainError, delegator::DelegationError,
    signer::SignerError,
};

/// Terminal error attached to a failed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxError {
    pub category: ErrorCategory,
    /// Human-readable summary suitable for display.
    pub message: String,
    /// Original error text, kept for diagnostics.
    pub raw: String,
}

impl TxError {
    pub fn new(
        category: ErrorCategory,
        message: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            raw: raw.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

impl std::fmt::Display for TxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl std::error::Error for TxError {}

fn summary(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::UserRejection => "The request was rejected in the wallet.",
        ErrorCategory::NetworkError => "The network could not be reached. Please try again.",
        ErrorCategory::ConfigurationError => "The transaction could not be prepared.",
        ErrorCategory::ProviderError => "The transaction was refused by the service.",
        ErrorCategory::Unknown => "Something went wrong.",
    }
}

fn classified(category: ErrorCategory, raw: impl std::fmt::Display) -> TxError {
    TxError::new(category, summary(category), raw.to_string())
}

fn signer_category(err: &SignerError) -> ErrorCategory {
    match err {
        SignerError::Rejected(_) => ErrorCategory::UserRejection,
        SignerError::Unavailable(_) => ErrorCategory::ConfigurationError,
        SignerError::Failed(_) => ErrorCategory::ProviderError,
    }
}

fn chain_category(err: &ChainError) -> ErrorCategory {
    match err {
        ChainError::Timeout | ChainError::Unavailable(_) => ErrorCategory::NetworkError,
        ChainError::Rejected(_) | ChainError::NotFound(_) => ErrorCategory::ProviderError,
        ChainError::Internal(_) => ErrorCategory::Unknown,
    }
}

impl From<SignerError> for TxError {
    fn from(err: SignerError) -> Self {
        classified(signer_category(&err), err)
    }
}

impl From<ChainError> for TxError {
    fn from(err: ChainError) -> Self {
        classified(chain_category(&err), err)
    }
}

impl From<ValidationError> for TxError {
    fn from(err: ValidationError) -> Self {
        classified(ErrorCategory::ConfigurationError, err)
    }
}

impl From<AuthorizationError> for TxError {
    fn from(err: AuthorizationError) -> Self {
        let category = match &err {
            AuthorizationError::Signer(inner) => signer_category(inner),
            AuthorizationError::EmptyClauses => ErrorCategory::ConfigurationError,
            AuthorizationError::MissingClause(_) => ErrorCategory::Unknown,
        };
        classified(category, err)
    }
}

impl From<DelegationError> for TxError {
    fn from(err: DelegationError) -> Self {
        let category = match &err {
            DelegationError::Network(_) => ErrorCategory::NetworkError,
            DelegationError::Http { .. }
            | DelegationError::Malformed(_)
            | DelegationError::SponsorRejected { .. }
            | DelegationError::MissingSignature => ErrorCategory::ProviderError,
            DelegationError::Authorization(inner) => {
                return inner.clone().into();
            }
            DelegationError::Chain(inner) => chain_category(inner),
            DelegationError::Throwaway(_)
            | DelegationError::Aborted(_)
            | DelegationError::Codec(_) => ErrorCategory::Unknown,
        };
        classified(category, err)
    }
}
