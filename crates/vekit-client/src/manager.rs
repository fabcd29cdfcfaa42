//! TransactionManager: lifecycle orchestration, registry, events, and cancellation.
//!
//! Each `send` registers a `TrackedTransaction` in `building` and drives it on a local
//! task through `estimating -> signing -> broadcasting -> pending` to a terminal state.
//! Transitions only move forward; terminal entries are never modified and are removed
//! only by `clear_completed_transactions`. Every transition emits a `StatusChange`.

use std::{
    cell::Cell,
    collections::HashMap,
    rc::Rc,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};
use vekit_types::{
    Address, Clause, ErrorCategory, GasToken, SignedTransaction, TrackingId, TxId,
    ValidationError,
};

use crate::{
    account::{SmartAccount, SmartAccountResolver},
    authorization::{AuthorizationClauseBuilder, AuthorizationOptions},
    chain::{now_millis, BodyOptions, ChainClient, Receipt},
    config::KitConfig,
    delegator::{
        DelegatedSend, DelegationError, DelegationPhase, DelegatorPricing, DelegatorTransport,
        FeeDelegationClient,
    },
    error::TxError,
    gas::{apply_gas_padding, GasEstimator},
    gas_token::{GasTokenError, GasTokenSelector, PreferenceStore},
    signer::{AccountSigner, SigningPrompt},
};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
    Idle,
    Building,
    Estimating,
    Signing,
    Broadcasting,
    Pending,
    Confirmed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Building => 1,
            Self::Estimating => 2,
            Self::Signing => 3,
            Self::Broadcasting => 4,
            Self::Pending => 5,
            Self::Confirmed | Self::Failed | Self::Cancelled => 6,
        }
    }
}

/// How the owner authorizes the clauses of an intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationMode {
    /// Clauses run through the owner's smart account under a typed-data authorization.
    #[default]
    SmartAccount,
    /// Clauses are sent as given from the owner's own address, which signs the transaction.
    DirectSignature,
}

/// What the caller wants executed and how it should be paid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub clauses: Vec<Clause>,
    pub signer_address: Address,
    pub max_gas: Option<u64>,
    pub delegated: bool,
    pub authorization: AuthorizationMode,
    pub gas_token: Option<GasToken>,
    pub ui_hints: Option<SigningPrompt>,
}

impl TransactionIntent {
    pub fn new(signer_address: Address, clauses: Vec<Clause>) -> Self {
        Self {
            clauses,
            signer_address,
            max_gas: None,
            delegated: false,
            authorization: AuthorizationMode::SmartAccount,
            gas_token: None,
            ui_hints: None,
        }
    }

    pub fn with_authorization(mut self, mode: AuthorizationMode) -> Self {
        self.authorization = mode;
        self
    }

    pub fn delegated(mut self, delegated: bool) -> Self {
        self.delegated = delegated;
        self
    }

    pub fn with_max_gas(mut self, max_gas: u64) -> Self {
        self.max_gas = Some(max_gas);
        self
    }

    pub fn with_gas_token(mut self, token: GasToken) -> Self {
        self.gas_token = Some(token);
        self
    }

    pub fn with_ui_hints(mut self, hints: SigningPrompt) -> Self {
        self.ui_hints = Some(hints);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTransaction {
    pub id: TrackingId,
    pub status: TransactionStatus,
    pub clauses: Vec<Clause>,
    pub signer_address: Address,
    /// Unix milliseconds.
    pub created_at: u64,
    pub tx_id: Option<TxId>,
    pub receipt: Option<Receipt>,
    pub error: Option<TxError>,
    pub delegation_token: Option<GasToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    StatusChange {
        id: TrackingId,
        status: TransactionStatus,
        tx_id: Option<TxId>,
    },
    Connected {
        address: Address,
    },
    Disconnected,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Preferences(#[from] GasTokenError),
    #[error("transaction {0} not found")]
    NotFound(TrackingId),
}

impl ManagerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::Preferences(_) => ErrorCategory::ConfigurationError,
            Self::NotFound(_) => ErrorCategory::Unknown,
        }
    }
}

struct Entry {
    tx: TrackedTransaction,
    /// Set once the network submission has started; cancellation is refused from then on.
    submitting: bool,
}

type Registry = Arc<Mutex<HashMap<TrackingId, Entry>>>;

/// Why a send stopped before reaching the chain outcome.
enum Halt {
    Cancelled,
    Failed(TxError),
}

impl From<TxError> for Halt {
    fn from(err: TxError) -> Self {
        Self::Failed(err)
    }
}

type Selector<C, D> = GasTokenSelector<DelegatorPricing<C, D>, Box<dyn PreferenceStore>>;

struct Inner<C, D> {
    chain: C,
    delegation: Rc<FeeDelegationClient<C, D>>,
    selector: Selector<C, D>,
    resolver: SmartAccountResolver<C>,
    estimator: GasEstimator<C>,
    builder: AuthorizationClauseBuilder<Rc<dyn AccountSigner>>,
    signer: Rc<dyn AccountSigner>,
    config: KitConfig,
    registry: Registry,
    events: broadcast::Sender<TransactionEvent>,
    connected: Cell<Option<Address>>,
}

pub struct TransactionManager<C, D> {
    inner: Rc<Inner<C, D>>,
}

impl<C, D> Clone for TransactionManager<C, D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C, D> TransactionManager<C, D>
where
    C: ChainClient + Clone + 'static,
    D: DelegatorTransport + 'static,
{
    pub fn new(
        chain: C,
        transport: D,
        signer: Rc<dyn AccountSigner>,
        preferences: Box<dyn PreferenceStore>,
        config: KitConfig,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        let meta = config.request_meta();
        let delegation = Rc::new(FeeDelegationClient::new(chain.clone(), transport, &config));
        let selector =
            GasTokenSelector::new(DelegatorPricing::new(delegation.clone()), preferences)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Inner {
            resolver: SmartAccountResolver::new(
                chain.clone(),
                config.account_factory,
                meta.clone(),
            ),
            estimator: GasEstimator::new(chain.clone(), meta),
            builder: AuthorizationClauseBuilder::new(
                signer.clone(),
                config.chain_id,
                config.authorization_validity_secs,
            ),
            chain,
            delegation,
            selector,
            signer,
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            events,
            connected: Cell::new(None),
        };
        Ok(Self {
            inner: Rc::new(inner),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.inner.events.subscribe()
    }

    pub fn gas_token_selector(&self) -> &Selector<C, D> {
        &self.inner.selector
    }

    pub fn delegation_client(&self) -> &FeeDelegationClient<C, D> {
        &self.inner.delegation
    }

    pub fn connected_address(&self) -> Option<Address> {
        self.inner.connected.get()
    }

    pub fn connect(&self, address: Address) {
        self.inner.connected.set(Some(address));
        info!(address = %address, "wallet connected");
        let _ = self.inner.events.send(TransactionEvent::Connected { address });
    }

    pub fn disconnect(&self) {
        if self.inner.connected.take().is_some() {
            info!("wallet disconnected");
            let _ = self.inner.events.send(TransactionEvent::Disconnected);
        }
    }

    /// Registers the intent and starts driving it on a local task.
    ///
    /// Must be called inside a `tokio::task::LocalSet` on native targets.
    pub fn send(&self, intent: TransactionIntent) -> Result<TrackedTransaction, ManagerError> {
        if intent.clauses.is_empty() {
            return Err(ValidationError::MissingField("clauses").into());
        }
        if intent.signer_address != self.inner.signer.address() {
            return Err(ValidationError::Message(format!(
                "intent signer {} is not the connected signer {}",
                intent.signer_address,
                self.inner.signer.address()
            ))
            .into());
        }
        if intent.delegated && intent.authorization == AuthorizationMode::DirectSignature {
            return Err(ValidationError::Message(
                "sponsored sends require smart-account authorization".to_string(),
            )
            .into());
        }

        let id = TrackingId::new(rand::random());
        let tracked = TrackedTransaction {
            id,
            status: TransactionStatus::Building,
            clauses: intent.clauses.clone(),
            signer_address: intent.signer_address,
            created_at: now_millis(),
            tx_id: None,
            receipt: None,
            error: None,
            delegation_token: None,
        };
        self.inner.lock().insert(
            id,
            Entry {
                tx: tracked.clone(),
                submitting: false,
            },
        );
        info!(
            tracking_id = %id,
            clauses = intent.clauses.len(),
            delegated = intent.delegated,
            authorization = ?intent.authorization,
            "transaction registered"
        );
        self.inner.emit_status(id, TransactionStatus::Building, None);

        let inner = self.inner.clone();
        spawn_local(async move {
            inner.drive(id, intent).await;
        });
        Ok(tracked)
    }

    pub fn get_transaction(&self, id: TrackingId) -> Option<TrackedTransaction> {
        self.inner.lock().get(&id).map(|entry| entry.tx.clone())
    }

    /// Non-terminal transactions, oldest first.
    pub fn get_pending_transactions(&self) -> Vec<TrackedTransaction> {
        let mut pending: Vec<_> = self
            .inner
            .lock()
            .values()
            .filter(|entry| !entry.tx.status.is_terminal())
            .map(|entry| entry.tx.clone())
            .collect();
        pending.sort_by_key(|tx| tx.created_at);
        pending
    }

    pub fn clear_completed_transactions(&self) -> usize {
        let mut registry = self.inner.lock();
        let before = registry.len();
        registry.retain(|_, entry| !entry.tx.status.is_terminal());
        before - registry.len()
    }

    /// Succeeds only while the transaction is non-terminal and nothing has been submitted.
    pub fn cancel(&self, id: TrackingId) -> bool {
        {
            let mut registry = self.inner.lock();
            let Some(entry) = registry.get_mut(&id) else {
                return false;
            };
            if entry.tx.status.is_terminal() || entry.submitting || entry.tx.tx_id.is_some() {
                return false;
            }
            entry.tx.status = TransactionStatus::Cancelled;
        }
        info!(tracking_id = %id, "transaction cancelled");
        self.inner.emit_status(id, TransactionStatus::Cancelled, None);
        true
    }

    /// Resolves once the transaction reaches a terminal state.
    pub async fn wait_for_settlement(
        &self,
        id: TrackingId,
    ) -> Result<TrackedTransaction, ManagerError> {
        let mut events = self.subscribe();
        loop {
            let current = self
                .get_transaction(id)
                .ok_or(ManagerError::NotFound(id))?;
            if current.status.is_terminal() {
                return Ok(current);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(current),
            }
        }
    }
}

impl<C, D> Inner<C, D>
where
    C: ChainClient + Clone + 'static,
    D: DelegatorTransport + 'static,
{
    fn lock(&self) -> MutexGuard<'_, HashMap<TrackingId, Entry>> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit_status(&self, id: TrackingId, status: TransactionStatus, tx_id: Option<TxId>) {
        let _ = self
            .events
            .send(TransactionEvent::StatusChange { id, status, tx_id });
    }

    /// Moves forward to `status` after applying `update`.
    /// Returns `false` once the entry is terminal.
    fn advance(
        &self,
        id: TrackingId,
        status: TransactionStatus,
        update: impl FnOnce(&mut TrackedTransaction),
    ) -> bool {
        let tx_id = {
            let mut registry = self.lock();
            let Some(entry) = registry.get_mut(&id) else {
                return false;
            };
            if entry.tx.status.is_terminal() {
                return false;
            }
            update(&mut entry.tx);
            if status.rank() <= entry.tx.status.rank() {
                return true;
            }
            entry.tx.status = status;
            entry.tx.tx_id
        };
        info!(tracking_id = %id, status = ?status, "transaction status changed");
        self.emit_status(id, status, tx_id);
        true
    }

    /// Marks the start of network submission. Fails if the transaction was cancelled.
    fn begin_submission(&self, id: TrackingId) -> bool {
        {
            let mut registry = self.lock();
            let Some(entry) = registry.get_mut(&id) else {
                return false;
            };
            if entry.tx.status.is_terminal() {
                return false;
            }
            entry.submitting = true;
        }
        self.advance(id, TransactionStatus::Broadcasting, |_| {})
    }

    fn ensure_active(&self, id: TrackingId) -> Result<(), Halt> {
        match self.lock().get(&id) {
            Some(entry) if !entry.tx.status.is_terminal() => Ok(()),
            _ => Err(Halt::Cancelled),
        }
    }

    fn step(&self, id: TrackingId, status: TransactionStatus) -> Result<(), Halt> {
        if self.advance(id, status, |_| {}) {
            Ok(())
        } else {
            Err(Halt::Cancelled)
        }
    }

    fn fail(&self, id: TrackingId, err: TxError) {
        warn!(tracking_id = %id, category = %err.category, error = %err.raw, "transaction failed");
        self.advance(id, TransactionStatus::Failed, |tx| tx.error = Some(err));
    }

    async fn drive(&self, id: TrackingId, intent: TransactionIntent) {
        match self.submit(id, &intent).await {
            Ok(tx_id) => self.settle(id, tx_id).await,
            Err(Halt::Cancelled) => {
                info!(tracking_id = %id, "transaction stopped after cancellation");
            }
            Err(Halt::Failed(err)) => self.fail(id, err),
        }
    }

    async fn submit(&self, id: TrackingId, intent: &TransactionIntent) -> Result<TxId, Halt> {
        if intent.authorization == AuthorizationMode::DirectSignature {
            self.step(id, TransactionStatus::Estimating)?;
            let gas = match intent.max_gas {
                Some(max_gas) => max_gas,
                None => {
                    let estimate = self
                        .estimator
                        .estimate(&intent.clauses, Some(intent.signer_address))
                        .await;
                    apply_gas_padding(estimate, self.config.gas_padding)
                }
            };
            self.ensure_active(id)?;
            self.step(id, TransactionStatus::Signing)?;
            return self.sign_and_send(id, intent, &intent.clauses, gas).await;
        }

        let account = self
            .resolver
            .resolve(intent.signer_address)
            .await
            .map_err(TxError::from)?;
        self.ensure_active(id)?;

        self.step(id, TransactionStatus::Estimating)?;
        let token = if intent.delegated {
            self.choose_gas_token(intent, &account).await
        } else {
            None
        };
        self.ensure_active(id)?;

        match token {
            Some(token) => self.submit_delegated(id, intent, &account, token).await,
            None => self.submit_direct(id, intent, &account).await,
        }
    }

    async fn choose_gas_token(
        &self,
        intent: &TransactionIntent,
        account: &SmartAccount,
    ) -> Option<GasToken> {
        if let Some(token) = intent.gas_token {
            return Some(token);
        }
        let selection = self
            .selector
            .select_optimal_gas_token(&intent.clauses, account.address)
            .await;
        if selection.is_none() {
            warn!(account = %account.address, "no affordable gas token; paying directly");
        }
        selection.map(|selected| selected.token)
    }

    async fn submit_delegated(
        &self,
        id: TrackingId,
        intent: &TransactionIntent,
        account: &SmartAccount,
        token: GasToken,
    ) -> Result<TxId, Halt> {
        self.advance(id, TransactionStatus::Estimating, |tx| {
            tx.delegation_token = Some(token)
        });
        let request = DelegatedSend {
            clauses: &intent.clauses,
            account,
            token,
            builder: &self.builder,
            prompt: intent.ui_hints.clone().unwrap_or_default(),
            max_gas: intent.max_gas,
        };
        let result = self
            .delegation
            .send_transaction_using_generic_delegator(request, |phase| match phase {
                DelegationPhase::Quoting => self.advance(id, TransactionStatus::Estimating, |_| {}),
                DelegationPhase::Authorizing
                | DelegationPhase::Estimating
                | DelegationPhase::Exchanging => {
                    self.advance(id, TransactionStatus::Signing, |_| {})
                }
                DelegationPhase::Broadcasting => self.begin_submission(id),
            })
            .await;
        match result {
            Ok(submission) => Ok(submission.tx_id),
            Err(DelegationError::Aborted(_)) => Err(Halt::Cancelled),
            Err(err) => Err(TxError::from(err).into()),
        }
    }

    async fn submit_direct(
        &self,
        id: TrackingId,
        intent: &TransactionIntent,
        account: &SmartAccount,
    ) -> Result<TxId, Halt> {
        let gas = match intent.max_gas {
            Some(max_gas) => max_gas,
            None => {
                let shaped = self
                    .builder
                    .build(&intent.clauses, account, &AuthorizationOptions::estimation())
                    .await
                    .map_err(TxError::from)?;
                let estimate = self.estimator.estimate(&shaped, Some(account.owner)).await;
                apply_gas_padding(estimate, self.config.gas_padding)
            }
        };
        self.ensure_active(id)?;

        self.step(id, TransactionStatus::Signing)?;
        let prompt = intent.ui_hints.clone().unwrap_or_default();
        let authorized = self
            .builder
            .build(&intent.clauses, account, &AuthorizationOptions::signing(prompt))
            .await
            .map_err(TxError::from)?;
        self.sign_and_send(id, intent, &authorized, gas).await
    }

    /// Builds a self-paid body from `clauses`, has the owner sign it, and broadcasts it.
    async fn sign_and_send(
        &self,
        id: TrackingId,
        intent: &TransactionIntent,
        clauses: &[Clause],
        gas: u64,
    ) -> Result<TxId, Halt> {
        let prompt = intent.ui_hints.clone().unwrap_or_default();
        let body = self
            .chain
            .build_transaction_body(clauses, gas, BodyOptions::default())
            .await
            .map_err(TxError::from)?;
        let signature = self
            .signer
            .sign_hash(body.signing_hash(), &prompt)
            .await
            .map_err(TxError::from)?;
        let signed = SignedTransaction::new(body, signature);

        if !self.begin_submission(id) {
            return Err(Halt::Cancelled);
        }
        let tx_id = self
            .chain
            .send_transaction(&signed.encode())
            .await
            .map_err(TxError::from)?;
        info!(tracking_id = %id, tx_id = %tx_id, gas, "transaction broadcast");
        Ok(tx_id)
    }

    /// Broadcast succeeded: record the id, then follow the chain outcome to a terminal state.
    async fn settle(&self, id: TrackingId, tx_id: TxId) {
        self.advance(id, TransactionStatus::Pending, |tx| tx.tx_id = Some(tx_id));
        match self.chain.wait_for_receipt(tx_id).await {
            Ok(receipt) if !receipt.reverted => {
                self.advance(id, TransactionStatus::Confirmed, |tx| {
                    tx.receipt = Some(receipt)
                });
            }
            Ok(receipt) => {
                let err = TxError::new(
                    ErrorCategory::ProviderError,
                    "The transaction reverted on chain.",
                    format!("transaction {tx_id} reverted"),
                );
                warn!(tracking_id = %id, tx_id = %tx_id, "transaction reverted");
                self.advance(id, TransactionStatus::Failed, |tx| {
                    tx.receipt = Some(receipt);
                    tx.error = Some(err);
                });
            }
            Err(err) => self.fail(id, err.into()),
        }
    }
}

fn spawn_local<F>(future: F)
where
    F: std::future::Future<Output = ()> + 'static,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        tokio::task::spawn_local(future);
    }

    #[cfg(target_arch = "wasm32")]
    wasm_bindgen_futures::spawn_local(future);
}
