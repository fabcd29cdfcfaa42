use std::{
    future::Future,
    pin::pin,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::future::{select, Either};
use rand::Rng;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};
use vekit_chain_mock::{MockChain, MockChainError};
use vekit_types::{Address, Bytes, Clause, RawClause, TransactionBody, TxId, U256};

/// Per-request metadata used for bounded retries and deadline control.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
}

/// Retry behavior for idempotent node reads.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 50,
            max_backoff_ms: 500,
            jitter_ms: 20,
        }
    }
}

/// Error model for chain node operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("request timed out")]
    Timeout,
    #[error("node unavailable: {0}")]
    Unavailable(String),
    #[error("node rejected request: {0}")]
    Rejected(String),
    #[error("transaction {0} not found")]
    NotFound(TxId),
    #[error("internal chain client error: {0}")]
    Internal(String),
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

impl From<MockChainError> for ChainError {
    fn from(err: MockChainError) -> Self {
        match err {
            MockChainError::Unavailable(msg) => Self::Unavailable(msg),
            MockChainError::Rejected(msg) => Self::Rejected(msg),
            MockChainError::NotFound(id) => Self::NotFound(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasEstimate {
    pub total_gas: u64,
    pub reverted: bool,
    pub revert_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyOptions {
    pub delegated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    pub balance: U256,
    pub energy: U256,
    pub has_code: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_id: TxId,
    pub reverted: bool,
    pub gas_used: u64,
    pub gas_payer: Address,
    pub block_number: u64,
}

/// Chain node interface. Wire format and transport are the implementation's concern.
#[async_trait(?Send)]
pub trait ChainClient {
    async fn estimate_gas(
        &self,
        clauses: &[Clause],
        caller: Option<Address>,
    ) -> Result<GasEstimate, ChainError>;

    async fn build_transaction_body(
        &self,
        clauses: &[Clause],
        gas: u64,
        options: BodyOptions,
    ) -> Result<TransactionBody, ChainError>;

    async fn send_transaction(&self, raw: &[u8]) -> Result<TxId, ChainError>;

    async fn wait_for_receipt(&self, tx_id: TxId) -> Result<Receipt, ChainError>;

    async fn get_account(&self, address: Address) -> Result<AccountState, ChainError>;

    async fn get_bytecode(&self, address: Address) -> Result<Bytes, ChainError>;

    /// Read-only simulation of a single clause; returns the call output.
    async fn call(&self, clause: &Clause, caller: Option<Address>) -> Result<Bytes, ChainError>;
}

/// In-memory chain client backed by `MockChain`, used for tests and the demo.
#[derive(Clone)]
pub struct MockChainClient {
    chain: Arc<Mutex<MockChain>>,
    receipt_gate: Option<Arc<Notify>>,
}

impl MockChainClient {
    pub fn new(chain: MockChain) -> Self {
        Self {
            chain: Arc::new(Mutex::new(chain)),
            receipt_gate: None,
        }
    }

    /// Receipts are held back until `gate` is notified once per receipt.
    pub fn with_receipt_gate(mut self, gate: Arc<Notify>) -> Self {
        self.receipt_gate = Some(gate);
        self
    }

    pub fn with_chain<R>(&self, f: impl FnOnce(&mut MockChain) -> R) -> Result<R, ChainError> {
        let mut lock = self
            .chain
            .lock()
            .map_err(|_| ChainError::Unavailable("mutex poisoned".to_string()))?;
        Ok(f(&mut lock))
    }
}

#[async_trait(?Send)]
impl ChainClient for MockChainClient {
    async fn estimate_gas(
        &self,
        clauses: &[Clause],
        caller: Option<Address>,
    ) -> Result<GasEstimate, ChainError> {
        let raw: Vec<RawClause> = clauses.iter().map(Clause::to_raw).collect();
        let estimate = self.with_chain(|chain| chain.estimate_gas(&raw, caller))??;
        Ok(GasEstimate {
            total_gas: estimate.total_gas,
            reverted: estimate.reverted,
            revert_reason: estimate.revert_reason,
        })
    }

    async fn build_transaction_body(
        &self,
        clauses: &[Clause],
        gas: u64,
        options: BodyOptions,
    ) -> Result<TransactionBody, ChainError> {
        let raw: Vec<RawClause> = clauses.iter().map(Clause::to_raw).collect();
        self.with_chain(|chain| chain.build_body(&raw, gas, options.delegated))
    }

    async fn send_transaction(&self, raw: &[u8]) -> Result<TxId, ChainError> {
        Ok(self.with_chain(|chain| chain.submit(raw))??)
    }

    async fn wait_for_receipt(&self, tx_id: TxId) -> Result<Receipt, ChainError> {
        if let Some(gate) = &self.receipt_gate {
            gate.notified().await;
        }
        let receipt = self.with_chain(|chain| chain.receipt(tx_id))??;
        Ok(Receipt {
            tx_id: receipt.tx_id,
            reverted: receipt.reverted,
            gas_used: receipt.gas_used,
            gas_payer: receipt.gas_payer,
            block_number: receipt.block_number,
        })
    }

    async fn get_account(&self, address: Address) -> Result<AccountState, ChainError> {
        let account = self.with_chain(|chain| chain.account(address))?;
        Ok(AccountState {
            balance: account.balance,
            energy: account.energy,
            has_code: !account.code.is_empty(),
        })
    }

    async fn get_bytecode(&self, address: Address) -> Result<Bytes, ChainError> {
        self.with_chain(|chain| chain.code(address))
    }

    async fn call(&self, clause: &Clause, _caller: Option<Address>) -> Result<Bytes, ChainError> {
        Ok(self.with_chain(|chain| chain.call(clause.to(), clause.data()))??)
    }
}

/// Runs one idempotent node request under `meta`.
///
/// Each attempt is raced against what is left of `timeout_ms`, so a node that never
/// answers yields `ChainError::Timeout`. Retryable failures are retried with capped
/// exponential backoff while both the retry budget and the deadline allow it.
pub async fn node_request<T, F, Fut>(
    meta: &RequestMeta,
    request: &'static str,
    mut op: F,
) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let deadline = now_millis().saturating_add(meta.timeout_ms);
    let mut attempt = 0u32;
    loop {
        let remaining = deadline.saturating_sub(now_millis());
        if remaining == 0 {
            warn!(request, attempt, "node request deadline reached");
            return Err(ChainError::Timeout);
        }
        let err = match select(pin!(op()), pin!(sleep_millis(remaining))).await {
            Either::Left((Ok(value), _)) => return Ok(value),
            Either::Left((Err(err), _)) => err,
            Either::Right(_) => {
                warn!(request, attempt, timeout_ms = meta.timeout_ms, "node request timed out");
                return Err(ChainError::Timeout);
            }
        };
        if !err.is_retryable() || attempt >= meta.retry_policy.max_retries {
            return Err(err);
        }

        let delay = backoff_delay_ms(attempt, &meta.retry_policy);
        if delay >= deadline.saturating_sub(now_millis()) {
            return Err(ChainError::Timeout);
        }
        attempt += 1;
        debug!(request, attempt, delay_ms = delay, error = %err, "retrying node request");
        sleep_millis(delay).await;
    }
}

fn backoff_delay_ms(attempt: u32, policy: &RetryPolicy) -> u64 {
    let exp = policy
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped = exp.min(policy.max_backoff_ms);
    let jitter = if policy.jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=policy.jitter_ms)
    };
    capped.saturating_add(jitter)
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) async fn sleep_millis(ms: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}

/// Resolves after `ms` through the host's `setTimeout`.
#[cfg(target_arch = "wasm32")]
pub(crate) async fn sleep_millis(ms: u64) {
    let delay = i32::try_from(ms).unwrap_or(i32::MAX);
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        let scheduled = web_sys::window().map(|window| {
            window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, delay)
        });
        if !matches!(scheduled, Some(Ok(_))) {
            let _ = resolve.call0(&wasm_bindgen::JsValue::UNDEFINED);
        }
    });
    let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
}

/// Unix milliseconds.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Unix milliseconds.
#[cfg(target_arch = "wasm32")]
pub(crate) fn now_millis() -> u64 {
    js_sys::Date::now() as u64
}
