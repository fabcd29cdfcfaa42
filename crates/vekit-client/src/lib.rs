//! VeChain smart-account transaction pipeline.
//!
//! This crate exposes:
//! - the chain seam (`ChainClient`, `MockChainClient`) with bounded retry,
//! - smart-account resolution and authorization clause building (`AuthorizationClauseBuilder`),
//! - gas estimation with fallback (`GasEstimator`) and gas-token selection (`GasTokenSelector`),
//! - the generic fee-delegation protocol (`FeeDelegationClient`, HTTP and mock transports),
//! - lifecycle orchestration (`TransactionManager`) and transfer helpers (`TransactionWrapper`).

pub mod account;
pub mod authorization;
pub mod chain;
pub mod config;
pub mod delegator;
pub mod error;
pub mod gas;
pub mod gas_token;
pub mod manager;
pub mod signer;
pub mod transfer;

pub use account::{SmartAccount, SmartAccountResolver};
pub use authorization::{
    AuthorizationClauseBuilder, AuthorizationError, AuthorizationMessage, AuthorizationOptions,
    AuthorizationTypedData,
};
pub use chain::{
    AccountState, BodyOptions, ChainClient, ChainError, GasEstimate, MockChainClient, Receipt,
    RequestMeta, RetryPolicy,
};
pub use config::{ConfigError, KitConfig, Network, TokenRegistry};
pub use delegator::{
    DelegatedSend, DelegatedSubmission, DelegationError, DelegationPhase, DelegationQuote,
    DelegatorPricing, DelegatorTransport, FeeDelegationClient, HttpDelegatorTransport,
    MockDelegatorTransport, ThrowawaySigner,
};
pub use error::TxError;
pub use gas::{apply_gas_padding, fallback_gas, GasEstimator};
pub use gas_token::{
    GasTokenCost, GasTokenError, GasTokenPreferences, GasTokenPricing, GasTokenSelection,
    GasTokenSelector, KeyValuePreferenceStore, PreferenceStore, PreferredTokenAvailability,
    PricingError,
};
pub use manager::{
    AuthorizationMode, ManagerError, TrackedTransaction, TransactionEvent, TransactionIntent,
    TransactionManager, TransactionStatus,
};
pub use signer::{
    signer_for_connection, AccountSigner, ConnectionKind, CrossAppSigner, EmbeddedWalletProvider,
    EmbeddedWalletSigner, LocalKeyProvider, SignerError, SigningPrompt,
};
pub use transfer::{
    transfer_clause, SendOptions, TransactionWrapper, TransferError, TransferRequest,
};
