//! FeeDelegationClient: the generic-delegator protocol and the end-to-end delegated send.
//!
//! Sponsor HTTP API, relative to the configured base URL (which ends in `/`):
//! - `GET  deposit/account` -> `{ depositAccount }`
//! - `POST estimate/clauses/{TOKEN}?type=smartaccount&speed=medium` `{ clauses, signer }`
//!   -> `{ transactionCost }` (whole tokens, number or numeric string)
//! - `POST sign/transaction/authorized/{TOKEN}` `{ raw, origin }`
//!   -> `{ statusCode?, message?, signature? }`, where `statusCode: 500` means failure.
//!
//! A delegated send pays the sponsor from the smart account (payment clause), signs the
//! body with a throwaway origin key, and submits the body carrying both signatures.

use std::{
    rc::Rc,
    sync::{Arc, Mutex},
};

use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use vekit_chain_mock::MockSponsor;
use vekit_types::{
    abi::IERC20, clause::decimal_u256, signature_bytes, Address, Bytes, Clause, CodecError,
    GasToken, SignedTransaction, TxId, B256, SIG_LEN, U256,
};

use crate::{
    account::SmartAccount,
    authorization::{AuthorizationClauseBuilder, AuthorizationError, AuthorizationOptions},
    chain::{node_request, sleep_millis, BodyOptions, ChainClient, ChainError, RequestMeta},
    config::{KitConfig, TokenRegistry},
    gas::{apply_gas_padding, GasEstimator},
    gas_token::{GasTokenPricing, PricingError},
    signer::{AccountSigner, SigningPrompt},
};

pub const SPONSOR_FAILURE_STATUS: u16 = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DelegationError {
    #[error("sponsor unreachable: {0}")]
    Network(String),
    #[error("sponsor returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("malformed sponsor response: {0}")]
    Malformed(String),
    #[error("sponsor refused to co-sign ({status_code}): {message}")]
    SponsorRejected { status_code: u16, message: String },
    #[error("sponsor response carried no signature")]
    MissingSignature,
    #[error("throwaway signer failed: {0}")]
    Throwaway(String),
    #[error("delegated send aborted before {0:?}")]
    Aborted(DelegationPhase),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<reqwest::Error> for DelegationError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Clause as the sponsor expects it: `value` in decimal, `data` as `0x` hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorClause {
    pub to: Address,
    #[serde(with = "decimal_u256")]
    pub value: U256,
    pub data: Bytes,
}

impl From<&Clause> for SponsorClause {
    fn from(clause: &Clause) -> Self {
        Self {
            to: clause.to(),
            value: clause.value(),
            data: clause.data().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositAccountResponse {
    pub deposit_account: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateRequest {
    pub clauses: Vec<SponsorClause>,
    pub signer: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateResponse {
    pub transaction_cost: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub raw: String,
    pub origin: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl SignResponse {
    /// Decodes a sign-endpoint reply. A failed HTTP status is recorded in `status_code`
    /// unless the body carries its own; a non-JSON failure body becomes the message.
    pub fn from_http(status: u16, body: &str) -> Result<Self, DelegationError> {
        let success = is_success(status);
        match serde_json::from_str::<SignResponse>(body) {
            Ok(mut response) => {
                if !success && response.status_code.is_none() {
                    response.status_code = Some(status);
                }
                Ok(response)
            }
            Err(_) if !success => Ok(SignResponse {
                status_code: Some(status),
                message: Some(body.trim().to_string()),
                signature: None,
            }),
            Err(err) => Err(DelegationError::Malformed(err.to_string())),
        }
    }

    /// The sponsor's 65-byte co-signature. Any reported failure status is a refusal.
    pub fn into_signature(self) -> Result<Bytes, DelegationError> {
        if let Some(status_code) = self.status_code {
            if !is_success(status_code) || self.signature.is_none() {
                return Err(DelegationError::SponsorRejected {
                    status_code,
                    message: self.message.unwrap_or_default(),
                });
            }
        }
        let signature = self.signature.ok_or(DelegationError::MissingSignature)?;
        let bytes = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|err| DelegationError::Malformed(format!("signature: {err}")))?;
        if bytes.len() != SIG_LEN {
            return Err(DelegationError::Malformed(format!(
                "signature has {} bytes",
                bytes.len()
            )));
        }
        Ok(Bytes::from(bytes))
    }
}

/// Decodes a deposit or estimate reply. Failed statuses become `Http`, carrying the
/// body's `message` when it has one and the raw body otherwise.
pub fn parse_json_reply<T: DeserializeOwned>(
    status: u16,
    body: &str,
) -> Result<T, DelegationError> {
    if !is_success(status) {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| value.get("message")?.as_str().map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        return Err(DelegationError::Http { status, message });
    }
    serde_json::from_str(body).map_err(|err| DelegationError::Malformed(err.to_string()))
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Sponsor HTTP boundary.
#[async_trait(?Send)]
pub trait DelegatorTransport {
    async fn deposit_account(&self) -> Result<DepositAccountResponse, DelegationError>;

    async fn estimate(
        &self,
        token: GasToken,
        request: &EstimateRequest,
    ) -> Result<EstimateResponse, DelegationError>;

    async fn sign(
        &self,
        token: GasToken,
        request: &SignRequest,
    ) -> Result<SignResponse, DelegationError>;
}

#[derive(Debug, Clone)]
pub struct HttpDelegatorTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDelegatorTransport {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self, DelegationError> {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let builder = reqwest::Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(std::time::Duration::from_millis(timeout_ms));
        #[cfg(target_arch = "wasm32")]
        let _ = timeout_ms;
        let client = builder
            .build()
            .map_err(|err| DelegationError::Network(err.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &KitConfig) -> Result<Self, DelegationError> {
        Self::new(config.delegator_url.clone(), config.request_timeout_ms)
    }

    pub fn deposit_url(&self) -> String {
        format!("{}deposit/account", self.base_url)
    }

    pub fn estimate_url(&self, token: GasToken) -> String {
        format!(
            "{}estimate/clauses/{}?type=smartaccount&speed=medium",
            self.base_url,
            token.symbol()
        )
    }

    pub fn sign_url(&self, token: GasToken) -> String {
        format!(
            "{}sign/transaction/authorized/{}",
            self.base_url,
            token.symbol()
        )
    }
}

async fn read_reply(response: reqwest::Response) -> Result<(u16, String), DelegationError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    debug!(status, bytes = body.len(), "sponsor reply");
    Ok((status, body))
}

#[async_trait(?Send)]
impl DelegatorTransport for HttpDelegatorTransport {
    async fn deposit_account(&self) -> Result<DepositAccountResponse, DelegationError> {
        let (status, body) = read_reply(self.client.get(self.deposit_url()).send().await?).await?;
        parse_json_reply(status, &body)
    }

    async fn estimate(
        &self,
        token: GasToken,
        request: &EstimateRequest,
    ) -> Result<EstimateResponse, DelegationError> {
        let response = self
            .client
            .post(self.estimate_url(token))
            .json(request)
            .send()
            .await?;
        let (status, body) = read_reply(response).await?;
        parse_json_reply(status, &body)
    }

    async fn sign(
        &self,
        token: GasToken,
        request: &SignRequest,
    ) -> Result<SignResponse, DelegationError> {
        let response = self
            .client
            .post(self.sign_url(token))
            .json(request)
            .send()
            .await?;
        let (status, body) = read_reply(response).await?;
        SignResponse::from_http(status, &body)
    }
}

/// In-process sponsor backed by `MockSponsor`, used for tests and the demo.
#[derive(Clone)]
pub struct MockDelegatorTransport {
    sponsor: Arc<Mutex<MockSponsor>>,
}

impl MockDelegatorTransport {
    pub fn new(sponsor: MockSponsor) -> Self {
        Self {
            sponsor: Arc::new(Mutex::new(sponsor)),
        }
    }

    pub fn with_sponsor<R>(
        &self,
        f: impl FnOnce(&mut MockSponsor) -> R,
    ) -> Result<R, DelegationError> {
        let mut lock = self
            .sponsor
            .lock()
            .map_err(|_| DelegationError::Network("mutex poisoned".to_string()))?;
        Ok(f(&mut lock))
    }
}

#[async_trait(?Send)]
impl DelegatorTransport for MockDelegatorTransport {
    async fn deposit_account(&self) -> Result<DepositAccountResponse, DelegationError> {
        let deposit_account = self.with_sponsor(|sponsor| sponsor.deposit_account)?;
        Ok(DepositAccountResponse { deposit_account })
    }

    async fn estimate(
        &self,
        token: GasToken,
        request: &EstimateRequest,
    ) -> Result<EstimateResponse, DelegationError> {
        let cost = self.with_sponsor(|sponsor| {
            sponsor.estimate(token, request.clauses.len(), request.signer)
        })?;
        match cost {
            Ok(cost) => Ok(EstimateResponse {
                transaction_cost: Value::from(cost),
            }),
            Err(message) => Err(DelegationError::Http {
                status: SPONSOR_FAILURE_STATUS,
                message,
            }),
        }
    }

    async fn sign(
        &self,
        token: GasToken,
        request: &SignRequest,
    ) -> Result<SignResponse, DelegationError> {
        let outcome =
            self.with_sponsor(|sponsor| sponsor.sign(token, &request.raw, request.origin))?;
        Ok(SignResponse {
            status_code: outcome.status_code,
            message: outcome.message,
            signature: outcome.signature,
        })
    }
}

/// Converts a whole-token decimal (`0.25`, `"1.5"`, `2e-3`) to base units, rounding up.
pub fn parse_token_amount(raw: &Value, decimals: u8) -> Result<U256, DelegationError> {
    let text = match raw {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        other => {
            return Err(DelegationError::Malformed(format!(
                "transactionCost is not numeric: {other}"
            )))
        }
    };
    decimal_to_base_units(&text, decimals)
        .ok_or_else(|| DelegationError::Malformed(format!("transactionCost `{text}`")))
}

fn decimal_to_base_units(text: &str, decimals: u8) -> Option<U256> {
    let (mantissa, exponent) = match text.find(|c: char| c == 'e' || c == 'E') {
        Some(at) => (&text[..at], text[at + 1..].parse::<i32>().ok()?),
        None => (text, 0),
    };
    let mantissa = mantissa.strip_prefix('+').unwrap_or(mantissa);
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{int_part}{frac_part}");
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let base = U256::from_str_radix(&digits, 10).ok()?;
    let scale = exponent
        .checked_add(i32::from(decimals))?
        .checked_sub(i32::try_from(frac_part.len()).ok()?)?;
    let ten = U256::from(10u64);
    if scale >= 0 {
        base.checked_mul(ten.checked_pow(U256::from(scale as u64))?)
    } else {
        let Some(divisor) = ten.checked_pow(U256::from(scale.unsigned_abs())) else {
            // Below one base unit: any non-zero cost still costs one.
            return Some(if base.is_zero() { U256::ZERO } else { U256::from(1u64) });
        };
        let quotient = base / divisor;
        if (base % divisor).is_zero() {
            Some(quotient)
        } else {
            Some(quotient + U256::from(1u64))
        }
    }
}

/// Sponsor quote for one send attempt. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationQuote {
    pub deposit_account: Address,
    #[serde(with = "decimal_u256")]
    pub transaction_cost: U256,
    pub token: GasToken,
}

/// Progress of a delegated send, reported before each step starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DelegationPhase {
    Quoting,
    Authorizing,
    Estimating,
    Exchanging,
    Broadcasting,
}

/// Ephemeral origin key for one delegated send. Holds no funds and is never persisted.
pub struct ThrowawaySigner {
    signer: PrivateKeySigner,
}

impl ThrowawaySigner {
    pub fn generate() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn sign_hash(&self, hash: &B256) -> Result<[u8; SIG_LEN], DelegationError> {
        let signature = self
            .signer
            .sign_hash_sync(hash)
            .map_err(|err| DelegationError::Throwaway(err.to_string()))?;
        Ok(signature_bytes(&signature))
    }
}

pub struct DelegatedSend<'a, S> {
    pub clauses: &'a [Clause],
    pub account: &'a SmartAccount,
    pub token: GasToken,
    pub builder: &'a AuthorizationClauseBuilder<S>,
    pub prompt: SigningPrompt,
    pub max_gas: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedSubmission {
    pub tx_id: TxId,
    pub quote: DelegationQuote,
    pub gas: u64,
}

pub struct FeeDelegationClient<C, D> {
    chain: C,
    transport: D,
    estimator: GasEstimator<C>,
    tokens: TokenRegistry,
    meta: RequestMeta,
    gas_padding: f64,
    throttle_ms: u64,
}

impl<C, D> FeeDelegationClient<C, D>
where
    C: ChainClient + Clone,
    D: DelegatorTransport,
{
    pub fn new(chain: C, transport: D, config: &KitConfig) -> Self {
        Self {
            estimator: GasEstimator::new(chain.clone(), config.request_meta()),
            chain,
            transport,
            tokens: config.tokens,
            meta: config.request_meta(),
            gas_padding: config.gas_padding,
            throttle_ms: config.broadcast_throttle_ms,
        }
    }

    pub fn transport(&self) -> &D {
        &self.transport
    }

    pub async fn get_deposit_account(&self) -> Result<Address, DelegationError> {
        Ok(self.transport.deposit_account().await?.deposit_account)
    }

    /// Sponsor cost, in base units of `token`, for executing `clauses` from `signer`.
    pub async fn estimate_cost(
        &self,
        token: GasToken,
        clauses: &[Clause],
        signer: Address,
    ) -> Result<U256, DelegationError> {
        let request = EstimateRequest {
            clauses: clauses.iter().map(SponsorClause::from).collect(),
            signer,
        };
        let response = self.transport.estimate(token, &request).await?;
        parse_token_amount(&response.transaction_cost, token.decimals())
    }

    pub async fn quote(
        &self,
        token: GasToken,
        clauses: &[Clause],
        account: Address,
    ) -> Result<DelegationQuote, DelegationError> {
        let deposit_account = self.get_deposit_account().await?;
        let transaction_cost = self.estimate_cost(token, clauses, account).await?;
        debug!(
            token = %token,
            cost = %transaction_cost,
            deposit = %deposit_account,
            "sponsor quote"
        );
        Ok(DelegationQuote {
            deposit_account,
            transaction_cost,
            token,
        })
    }

    /// Transfer of the quoted cost from the smart account to the sponsor's deposit account.
    pub fn payment_clause(&self, quote: &DelegationQuote) -> Clause {
        let clause = match self.tokens.contract(quote.token) {
            None => Clause::transfer_vet(quote.deposit_account, quote.transaction_cost),
            Some(contract) => {
                Clause::erc20_transfer(contract, quote.deposit_account, quote.transaction_cost)
            }
        };
        clause.with_comment(format!("gas fee in {}", quote.token))
    }

    /// Sponsor co-signature over the delegation hash of `raw`, sent by `origin`.
    pub async fn sign_with_delegator(
        &self,
        token: GasToken,
        raw: String,
        origin: Address,
    ) -> Result<Bytes, DelegationError> {
        self.transport
            .sign(token, &SignRequest { raw, origin })
            .await?
            .into_signature()
    }

    /// Quote, authorize, estimate, co-sign, broadcast. Not retried.
    ///
    /// `on_phase` runs before each step; returning `false` aborts the send. It is never
    /// consulted again once `Broadcasting` has been accepted.
    pub async fn send_transaction_using_generic_delegator<S: AccountSigner>(
        &self,
        request: DelegatedSend<'_, S>,
        mut on_phase: impl FnMut(DelegationPhase) -> bool,
    ) -> Result<DelegatedSubmission, DelegationError> {
        let mut enter = |phase: DelegationPhase| {
            if on_phase(phase) {
                Ok(())
            } else {
                Err(DelegationError::Aborted(phase))
            }
        };
        let account = request.account;

        enter(DelegationPhase::Quoting)?;
        let quote = self
            .quote(request.token, request.clauses, account.address)
            .await?;

        enter(DelegationPhase::Authorizing)?;
        let mut clauses = request.clauses.to_vec();
        clauses.push(self.payment_clause(&quote));
        let authorized = request
            .builder
            .build(
                &clauses,
                account,
                &AuthorizationOptions::signing(request.prompt.clone()),
            )
            .await?;

        enter(DelegationPhase::Estimating)?;
        let throwaway = ThrowawaySigner::generate();
        let gas = match request.max_gas {
            Some(max_gas) => max_gas,
            None => apply_gas_padding(
                self.estimator
                    .estimate(&authorized, Some(throwaway.address()))
                    .await,
                self.gas_padding,
            ),
        };
        let body = self
            .chain
            .build_transaction_body(&authorized, gas, BodyOptions { delegated: true })
            .await?;
        let origin_signature = throwaway.sign_hash(&body.signing_hash())?;
        let partial = SignedTransaction::new(body, origin_signature.to_vec());

        enter(DelegationPhase::Exchanging)?;
        let sponsor_signature = self
            .sign_with_delegator(request.token, partial.encode_hex(), throwaway.address())
            .await?;

        enter(DelegationPhase::Broadcasting)?;
        let signature = [origin_signature.as_slice(), sponsor_signature.as_ref()].concat();
        let signed = SignedTransaction::new(partial.body, signature);
        let tx_id = self.chain.send_transaction(&signed.encode()).await?;
        info!(tx_id = %tx_id, token = %quote.token, gas, "delegated transaction broadcast");

        sleep_millis(self.throttle_ms).await;
        Ok(DelegatedSubmission { tx_id, quote, gas })
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        let query = Clause::call(token, IERC20::balanceOfCall { owner }.abi_encode());
        let out = node_request(&self.meta, "balance_of", || self.chain.call(&query, None)).await?;
        U256::abi_decode(&out).map_err(|err| ChainError::Internal(format!("balanceOf: {err}")))
    }
}

/// `GasTokenPricing` backed by the sponsor estimate endpoint and chain balances.
pub struct DelegatorPricing<C, D> {
    client: Rc<FeeDelegationClient<C, D>>,
}

impl<C, D> DelegatorPricing<C, D> {
    pub fn new(client: Rc<FeeDelegationClient<C, D>>) -> Self {
        Self { client }
    }
}

#[async_trait(?Send)]
impl<C, D> GasTokenPricing for DelegatorPricing<C, D>
where
    C: ChainClient + Clone,
    D: DelegatorTransport,
{
    async fn cost_in_token(
        &self,
        token: GasToken,
        clauses: &[Clause],
        account: Address,
    ) -> Result<U256, PricingError> {
        self.client
            .estimate_cost(token, clauses, account)
            .await
            .map_err(|err| {
                warn!(token = %token, error = %err, "sponsor estimate failed");
                PricingError::Sponsor(err.to_string())
            })
    }

    async fn balance_of(&self, token: GasToken, account: Address) -> Result<U256, PricingError> {
        let client = &self.client;
        match client.tokens.contract(token) {
            None => {
                let state = node_request(&client.meta, "get_account", || {
                    client.chain.get_account(account)
                })
                .await?;
                Ok(state.balance)
            }
            Some(contract) => Ok(client.erc20_balance(contract, account).await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use serde_json::json;
    use vekit_chain_mock::DemoScenario;
    use vekit_types::{Clause, GasToken, SignedTransaction, U256};

    use super::{
        parse_json_reply, parse_token_amount, DelegatedSend, DelegationError, DelegationPhase,
        DelegatorPricing, DepositAccountResponse, EstimateResponse, FeeDelegationClient,
        HttpDelegatorTransport, MockDelegatorTransport, SignResponse, SponsorClause,
    };
    use crate::{
        account::SmartAccount,
        authorization::AuthorizationClauseBuilder,
        chain::MockChainClient,
        config::KitConfig,
        gas_token::GasTokenPricing,
        signer::{EmbeddedWalletSigner, LocalKeyProvider, SigningPrompt},
    };

    struct Harness {
        client: FeeDelegationClient<MockChainClient, MockDelegatorTransport>,
        chain: MockChainClient,
        sponsor: MockDelegatorTransport,
        account: SmartAccount,
        builder: AuthorizationClauseBuilder<EmbeddedWalletSigner<LocalKeyProvider>>,
        recipient: vekit_types::Address,
    }

    fn harness(version: u64) -> Harness {
        let scenario = DemoScenario::new(version, true);
        let mut config = KitConfig::default();
        config.broadcast_throttle_ms = 0;
        config.account_factory = scenario.chain.factory;
        config.tokens.b3tr = vekit_chain_mock::scenarios::DEMO_B3TR;
        let account = SmartAccount {
            address: scenario.accounts.smart_account,
            owner: scenario.accounts.owner,
            version,
            deployed: true,
            factory: scenario.chain.factory,
        };
        let chain = MockChainClient::new(scenario.chain);
        let sponsor = MockDelegatorTransport::new(scenario.sponsor);
        let provider = LocalKeyProvider::from_key(&scenario.accounts.owner_key).expect("key");
        Harness {
            client: FeeDelegationClient::new(chain.clone(), sponsor.clone(), &config),
            chain,
            sponsor,
            account,
            builder: AuthorizationClauseBuilder::new(
                EmbeddedWalletSigner::new(provider),
                config.chain_id,
                config.authorization_validity_secs,
            ),
            recipient: scenario.accounts.recipient,
        }
    }

    #[test]
    fn converts_whole_token_costs_to_base_units() {
        let one = U256::from(1_000_000_000_000_000_000u128);
        assert_eq!(parse_token_amount(&json!(1), 18).unwrap(), one);
        assert_eq!(
            parse_token_amount(&json!("0.25"), 18).unwrap(),
            one / U256::from(4u64)
        );
        assert_eq!(
            parse_token_amount(&json!(2e-3), 18).unwrap(),
            U256::from(2_000_000_000_000_000u64)
        );
        assert_eq!(parse_token_amount(&json!("0.0000001"), 2).unwrap(), U256::from(1u64));
        assert!(matches!(
            parse_token_amount(&json!("-1"), 18),
            Err(DelegationError::Malformed(_))
        ));
        assert!(parse_token_amount(&json!(null), 18).is_err());
    }

    #[test]
    fn vanishing_costs_round_up_to_one_base_unit() {
        assert_eq!(parse_token_amount(&json!("1e-100"), 18).unwrap(), U256::from(1u64));
        assert_eq!(parse_token_amount(&json!(1e-300), 18).unwrap(), U256::from(1u64));
        assert_eq!(parse_token_amount(&json!("0e-100"), 18).unwrap(), U256::ZERO);
        assert_eq!(parse_token_amount(&json!("0.000e-90"), 18).unwrap(), U256::ZERO);
    }

    #[test]
    fn sign_reply_with_failure_status_in_body_is_a_refusal() {
        let response =
            SignResponse::from_http(200, r#"{"statusCode":500,"message":"no deposit"}"#).unwrap();
        assert_eq!(
            response.into_signature(),
            Err(DelegationError::SponsorRejected {
                status_code: 500,
                message: "no deposit".to_string(),
            })
        );
    }

    #[test]
    fn sign_reply_from_a_failing_gateway_keeps_the_raw_body() {
        let response = SignResponse::from_http(502, "<html>Bad Gateway</html>\n").unwrap();
        assert_eq!(response.status_code, Some(502));
        assert_eq!(
            response.into_signature(),
            Err(DelegationError::SponsorRejected {
                status_code: 502,
                message: "<html>Bad Gateway</html>".to_string(),
            })
        );

        let json_error = SignResponse::from_http(503, r#"{"message":"busy"}"#).unwrap();
        assert_eq!(json_error.status_code, Some(503));
        assert!(json_error.into_signature().is_err());
    }

    #[test]
    fn sign_reply_signature_is_validated() {
        assert!(matches!(
            SignResponse::from_http(200, "ok"),
            Err(DelegationError::Malformed(_))
        ));
        assert_eq!(
            SignResponse::from_http(200, "{}").unwrap().into_signature(),
            Err(DelegationError::MissingSignature)
        );

        let short = format!(r#"{{"signature":"0x{}"}}"#, "ab".repeat(64));
        assert!(matches!(
            SignResponse::from_http(200, &short).unwrap().into_signature(),
            Err(DelegationError::Malformed(_))
        ));
        let full = format!(r#"{{"signature":"0x{}"}}"#, "ab".repeat(65));
        let signature = SignResponse::from_http(200, &full)
            .unwrap()
            .into_signature()
            .unwrap();
        assert_eq!(signature.len(), 65);
    }

    #[test]
    fn deposit_and_estimate_replies_surface_http_failures() {
        assert_eq!(
            parse_json_reply::<DepositAccountResponse>(503, " upstream down "),
            Err(DelegationError::Http {
                status: 503,
                message: "upstream down".to_string(),
            })
        );
        assert_eq!(
            parse_json_reply::<EstimateResponse>(400, r#"{"message":"unsupported token"}"#),
            Err(DelegationError::Http {
                status: 400,
                message: "unsupported token".to_string(),
            })
        );
        assert!(matches!(
            parse_json_reply::<EstimateResponse>(200, "{}"),
            Err(DelegationError::Malformed(_))
        ));

        let deposit: DepositAccountResponse = parse_json_reply(
            200,
            r#"{"depositAccount":"0x00000000000000000000000000000000000000d1"}"#,
        )
        .unwrap();
        assert_eq!(deposit.deposit_account, vekit_types::Address::with_last_byte(0xd1));
        let estimate: EstimateResponse =
            parse_json_reply(200, r#"{"transactionCost":"0.25"}"#).unwrap();
        assert_eq!(estimate.transaction_cost, json!("0.25"));
    }

    #[test]
    fn http_transport_builds_exact_urls() {
        let transport =
            HttpDelegatorTransport::new("https://sponsor.example/api/v1", 15_000).expect("client");
        assert_eq!(
            transport.deposit_url(),
            "https://sponsor.example/api/v1/deposit/account"
        );
        assert_eq!(
            transport.estimate_url(GasToken::B3tr),
            "https://sponsor.example/api/v1/estimate/clauses/B3TR?type=smartaccount&speed=medium"
        );
        assert_eq!(
            transport.sign_url(GasToken::Vtho),
            "https://sponsor.example/api/v1/sign/transaction/authorized/VTHO"
        );
    }

    #[test]
    fn sponsor_clause_uses_decimal_value() {
        let clause = Clause::transfer_vet(vekit_types::Address::ZERO, U256::from(255u64))
            .with_comment("ignored");
        let json = serde_json::to_value(SponsorClause::from(&clause)).unwrap();
        assert_eq!(
            json,
            json!({
                "to": "0x0000000000000000000000000000000000000000",
                "value": "255",
                "data": "0x"
            })
        );
    }

    #[tokio::test]
    async fn payment_clause_targets_token_contract_or_native_value() {
        let h = harness(3);
        let quote = h
            .client
            .quote(
                GasToken::Vtho,
                &[Clause::transfer_vet(h.recipient, U256::from(1u64))],
                h.account.address,
            )
            .await
            .expect("quote");
        assert_eq!(quote.transaction_cost, U256::from(1_500_000_000_000_000_000u128));
        let payment = h.client.payment_clause(&quote);
        assert_eq!(payment.to(), KitConfig::default().tokens.vtho);
        assert_eq!(payment.value(), U256::ZERO);

        let mut vet_quote = quote.clone();
        vet_quote.token = GasToken::Vet;
        let payment = h.client.payment_clause(&vet_quote);
        assert_eq!(payment.to(), quote.deposit_account);
        assert_eq!(payment.value(), quote.transaction_cost);
    }

    #[tokio::test]
    async fn delegated_send_carries_both_signatures() {
        let h = harness(3);
        let clauses = vec![Clause::transfer_vet(h.recipient, U256::from(1u64))];
        let mut phases = Vec::new();
        let submission = h
            .client
            .send_transaction_using_generic_delegator(
                DelegatedSend {
                    clauses: &clauses,
                    account: &h.account,
                    token: GasToken::B3tr,
                    builder: &h.builder,
                    prompt: SigningPrompt::default(),
                    max_gas: None,
                },
                |phase| {
                    phases.push(phase);
                    true
                },
            )
            .await
            .expect("delegated send");

        assert_eq!(
            phases,
            vec![
                DelegationPhase::Quoting,
                DelegationPhase::Authorizing,
                DelegationPhase::Estimating,
                DelegationPhase::Exchanging,
                DelegationPhase::Broadcasting,
            ]
        );
        let submitted: Vec<SignedTransaction> = h
            .chain
            .with_chain(|chain| chain.submitted.clone())
            .expect("chain lock");
        assert_eq!(submitted.len(), 1);
        let tx = &submitted[0];
        assert!(tx.is_fully_signed());
        let sponsor_address = h.sponsor.with_sponsor(|s| s.address()).expect("lock");
        assert_eq!(tx.delegator().expect("recover"), Some(sponsor_address));
        assert_eq!(tx.id().expect("id"), submission.tx_id);
        assert_eq!(tx.body.clauses.len(), 1);
        assert_eq!(tx.body.clauses[0].to, h.account.address);
    }

    #[tokio::test]
    async fn sponsor_failure_stops_before_broadcast() {
        let h = harness(3);
        h.sponsor
            .with_sponsor(|s| s.sign_failure = Some("insufficient deposit".to_string()))
            .expect("lock");
        let clauses = vec![Clause::transfer_vet(h.recipient, U256::from(1u64))];
        let err = h
            .client
            .send_transaction_using_generic_delegator(
                DelegatedSend {
                    clauses: &clauses,
                    account: &h.account,
                    token: GasToken::Vtho,
                    builder: &h.builder,
                    prompt: SigningPrompt::default(),
                    max_gas: Some(90_000),
                },
                |_| true,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DelegationError::SponsorRejected { status_code: 500, .. }
        ));
        let submitted = h
            .chain
            .with_chain(|chain| chain.submitted.len())
            .expect("chain lock");
        assert_eq!(submitted, 0);
    }

    #[tokio::test]
    async fn abort_from_phase_callback_skips_remaining_steps() {
        let h = harness(1);
        let clauses = vec![Clause::transfer_vet(h.recipient, U256::from(1u64))];
        let err = h
            .client
            .send_transaction_using_generic_delegator(
                DelegatedSend {
                    clauses: &clauses,
                    account: &h.account,
                    token: GasToken::Vet,
                    builder: &h.builder,
                    prompt: SigningPrompt::default(),
                    max_gas: None,
                },
                |phase| phase != DelegationPhase::Exchanging,
            )
            .await
            .unwrap_err();
        assert_eq!(err, DelegationError::Aborted(DelegationPhase::Exchanging));
        let sign_requests = h
            .sponsor
            .with_sponsor(|s| s.sign_requests.len())
            .expect("lock");
        assert_eq!(sign_requests, 0);
    }

    #[tokio::test]
    async fn pricing_reads_native_and_token_balances() {
        let h = harness(3);
        let account = h.account.address;
        let pricing = DelegatorPricing::new(Rc::new(h.client));
        let vet = pricing.balance_of(GasToken::Vet, account).await.expect("vet");
        let vtho = pricing.balance_of(GasToken::Vtho, account).await.expect("vtho");
        let b3tr = pricing.balance_of(GasToken::B3tr, account).await.expect("b3tr");
        assert_eq!(vet, vekit_chain_mock::scenarios::tokens(10));
        assert_eq!(vtho, vekit_chain_mock::scenarios::tokens(100));
        assert_eq!(b3tr, vekit_chain_mock::scenarios::tokens(50));

        h.sponsor
            .with_sponsor(|s| {
                s.failing_estimates.insert(GasToken::Vtho);
            })
            .expect("lock");
        assert!(pricing
            .cost_in_token(GasToken::Vtho, &[], account)
            .await
            .is_err());
    }
}
