//! AuthorizationClauseBuilder: wrap intent clauses into smart-account
//! `executeWithAuthorization` / `executeBatchWithAuthorization` calls.
//!
//! Accounts older than version 3 authorize each clause separately (one signature
//! per clause). Newer accounts authorize the whole ordered batch with a single
//! signature over index-aligned `to[]/value[]/data[]` arrays and a random nonce.
//! Undeployed accounts get a leading `createAccount(owner)` clause on the factory.

use alloy_sol_types::{Eip712Domain, SolCall, SolStruct};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use vekit_types::{
    abi::{
        ExecuteBatchWithAuthorization, ExecuteWithAuthorization, ISimpleAccount,
        ISimpleAccountFactory,
    },
    Address, Bytes, Clause, B256, U256,
};

use crate::{
    account::SmartAccount,
    chain::now_millis,
    signer::{AccountSigner, SignerError, SigningPrompt},
};

pub const DOMAIN_NAME: &str = "Wallet";
pub const DOMAIN_VERSION: &str = "1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("no clause at index {0}")]
    MissingClause(usize),
    #[error("nothing to authorize")]
    EmptyClauses,
    #[error(transparent)]
    Signer(#[from] SignerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationMessage {
    Single(ExecuteWithAuthorization),
    Batch(ExecuteBatchWithAuthorization),
}

/// EIP-712 payload the owner signs off-chain. Built fresh for every signing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationTypedData {
    pub domain: Eip712Domain,
    pub message: AuthorizationMessage,
}

impl AuthorizationTypedData {
    pub fn primary_type(&self) -> &'static str {
        match self.message {
            AuthorizationMessage::Single(_) => "ExecuteWithAuthorization",
            AuthorizationMessage::Batch(_) => "ExecuteBatchWithAuthorization",
        }
    }

    pub fn signing_hash(&self) -> B256 {
        match &self.message {
            AuthorizationMessage::Single(message) => message.eip712_signing_hash(&self.domain),
            AuthorizationMessage::Batch(message) => message.eip712_signing_hash(&self.domain),
        }
    }

    /// `eth_signTypedData_v4` JSON for providers that take typed data as a document.
    pub fn to_json(&self) -> Value {
        let domain = json!({
            "name": self.domain.name.as_deref().unwrap_or(DOMAIN_NAME),
            "version": self.domain.version.as_deref().unwrap_or(DOMAIN_VERSION),
            "chainId": self.domain.chain_id.unwrap_or_default().to_string(),
            "verifyingContract": self.domain.verifying_contract.unwrap_or_default().to_string(),
        });
        let (fields, message) = match &self.message {
            AuthorizationMessage::Single(m) => (
                json!([
                    {"name": "to", "type": "address"},
                    {"name": "value", "type": "uint256"},
                    {"name": "data", "type": "bytes"},
                    {"name": "validAfter", "type": "uint256"},
                    {"name": "validBefore", "type": "uint256"},
                ]),
                json!({
                    "to": m.to.to_string(),
                    "value": m.value.to_string(),
                    "data": m.data.to_string(),
                    "validAfter": m.validAfter.to_string(),
                    "validBefore": m.validBefore.to_string(),
                }),
            ),
            AuthorizationMessage::Batch(m) => (
                json!([
                    {"name": "to", "type": "address[]"},
                    {"name": "value", "type": "uint256[]"},
                    {"name": "data", "type": "bytes[]"},
                    {"name": "validAfter", "type": "uint256"},
                    {"name": "validBefore", "type": "uint256"},
                    {"name": "nonce", "type": "bytes32"},
                ]),
                json!({
                    "to": m.to.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "value": m.value.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "data": m.data.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "validAfter": m.validAfter.to_string(),
                    "validBefore": m.validBefore.to_string(),
                    "nonce": m.nonce.to_string(),
                }),
            ),
        };
        let mut types = serde_json::Map::new();
        types.insert(
            "EIP712Domain".to_string(),
            json!([
                {"name": "name", "type": "string"},
                {"name": "version", "type": "string"},
                {"name": "chainId", "type": "uint256"},
                {"name": "verifyingContract", "type": "address"},
            ]),
        );
        types.insert(self.primary_type().to_string(), fields);
        json!({
            "domain": domain,
            "primaryType": self.primary_type(),
            "types": types,
            "message": message,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthorizationOptions {
    /// Produce correctly shaped clauses with empty signatures, without asking the signer.
    pub is_estimation: bool,
    pub skip_account_creation: bool,
    pub prompt: SigningPrompt,
}

impl AuthorizationOptions {
    pub fn estimation() -> Self {
        Self {
            is_estimation: true,
            ..Self::default()
        }
    }

    pub fn signing(prompt: SigningPrompt) -> Self {
        Self {
            prompt,
            ..Self::default()
        }
    }
}

pub struct AuthorizationClauseBuilder<S> {
    signer: S,
    chain_id: U256,
    validity_secs: u64,
    clock: fn() -> u64,
}

impl<S: AccountSigner> AuthorizationClauseBuilder<S> {
    pub fn new(signer: S, chain_id: U256, validity_secs: u64) -> Self {
        Self {
            signer,
            chain_id,
            validity_secs,
            clock: unix_now_secs,
        }
    }

    /// Replaces the wall clock (unix seconds) used for the validity window.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Picks single or batch mode from the account version.
    pub async fn build(
        &self,
        clauses: &[Clause],
        account: &SmartAccount,
        options: &AuthorizationOptions,
    ) -> Result<Vec<Clause>, AuthorizationError> {
        if account.supports_batch_authorization() {
            self.build_batch_authorization_clauses(clauses, account, options)
                .await
        } else {
            self.build_single_authorization_clauses(clauses, account, options)
                .await
        }
    }

    pub fn domain(&self, account: &SmartAccount) -> Eip712Domain {
        Eip712Domain {
            name: Some(DOMAIN_NAME.into()),
            version: Some(DOMAIN_VERSION.into()),
            chain_id: Some(self.chain_id),
            verifying_contract: Some(account.address),
            salt: None,
        }
    }

    pub async fn build_single_authorization_clauses(
        &self,
        clauses: &[Clause],
        account: &SmartAccount,
        options: &AuthorizationOptions,
    ) -> Result<Vec<Clause>, AuthorizationError> {
        if clauses.is_empty() {
            return Err(AuthorizationError::EmptyClauses);
        }
        let mut out = self.account_creation_prefix(account, options);
        for index in 0..clauses.len() {
            out.push(
                self.build_single_authorization_clause(clauses, index, account, options)
                    .await?,
            );
        }
        debug!(
            account = %account.address,
            clauses = out.len(),
            estimation = options.is_estimation,
            "built single authorization clauses"
        );
        Ok(out)
    }

    pub async fn build_single_authorization_clause(
        &self,
        clauses: &[Clause],
        index: usize,
        account: &SmartAccount,
        options: &AuthorizationOptions,
    ) -> Result<Clause, AuthorizationError> {
        let clause = clauses
            .get(index)
            .ok_or(AuthorizationError::MissingClause(index))?;
        let (valid_after, valid_before) = self.validity_window();
        let message = ExecuteWithAuthorization {
            to: clause.to(),
            value: clause.value(),
            data: clause.data().clone(),
            validAfter: valid_after,
            validBefore: valid_before,
        };
        let typed_data = AuthorizationTypedData {
            domain: self.domain(account),
            message: AuthorizationMessage::Single(message),
        };
        let signature = self.sign(&typed_data, options).await?;

        let call = ISimpleAccount::executeWithAuthorizationCall {
            to: clause.to(),
            value: clause.value(),
            data: clause.data().clone(),
            validAfter: valid_after,
            validBefore: valid_before,
            signature,
        };
        Ok(wrap(account.address, call.abi_encode(), clause))
    }

    pub async fn build_batch_authorization_clauses(
        &self,
        clauses: &[Clause],
        account: &SmartAccount,
        options: &AuthorizationOptions,
    ) -> Result<Vec<Clause>, AuthorizationError> {
        if clauses.is_empty() {
            return Err(AuthorizationError::EmptyClauses);
        }
        let (valid_after, valid_before) = self.validity_window();
        let nonce = B256::random();
        let message = ExecuteBatchWithAuthorization {
            to: clauses.iter().map(Clause::to).collect(),
            value: clauses.iter().map(Clause::value).collect(),
            data: clauses.iter().map(|clause| clause.data().clone()).collect(),
            validAfter: valid_after,
            validBefore: valid_before,
            nonce,
        };
        let typed_data = AuthorizationTypedData {
            domain: self.domain(account),
            message: AuthorizationMessage::Batch(message.clone()),
        };
        let signature = self.sign(&typed_data, options).await?;

        let call = ISimpleAccount::executeBatchWithAuthorizationCall {
            to: message.to,
            value: message.value,
            data: message.data,
            validAfter: valid_after,
            validBefore: valid_before,
            nonce,
            signature,
        };
        let mut out = self.account_creation_prefix(account, options);
        out.push(Clause::call(account.address, call.abi_encode()));
        debug!(
            account = %account.address,
            batched = clauses.len(),
            estimation = options.is_estimation,
            "built batch authorization clause"
        );
        Ok(out)
    }

    fn account_creation_prefix(
        &self,
        account: &SmartAccount,
        options: &AuthorizationOptions,
    ) -> Vec<Clause> {
        if account.deployed || options.skip_account_creation {
            return Vec::new();
        }
        let create = ISimpleAccountFactory::createAccountCall {
            owner: account.owner,
        };
        vec![Clause::call(account.factory, create.abi_encode())]
    }

    fn validity_window(&self) -> (U256, U256) {
        let now = (self.clock)();
        (
            U256::ZERO,
            U256::from(now.saturating_add(self.validity_secs)),
        )
    }

    async fn sign(
        &self,
        typed_data: &AuthorizationTypedData,
        options: &AuthorizationOptions,
    ) -> Result<Bytes, AuthorizationError> {
        if options.is_estimation {
            return Ok(Bytes::new());
        }
        Ok(self
            .signer
            .sign_typed_data(typed_data, &options.prompt)
            .await?)
    }
}

fn wrap(account: Address, calldata: Vec<u8>, original: &Clause) -> Clause {
    let wrapped = Clause::call(account, calldata);
    match original.comment() {
        Some(comment) => wrapped.with_comment(comment),
        None => wrapped,
    }
}

fn unix_now_secs() -> u64 {
    now_millis() / 1_000
}
