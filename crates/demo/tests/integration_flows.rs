//! End-to-end transaction flows against the in-memory chain and sponsor.

use std::rc::Rc;

use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tokio::task::LocalSet;
use vekit_chain_mock::{scenarios::tokens, DemoAccounts, DemoScenario};
use vekit_client::{
    signer_for_connection, AccountSigner, AuthorizationMode, AuthorizationTypedData,
    ConnectionKind, EmbeddedWalletProvider, KeyValuePreferenceStore, KitConfig, LocalKeyProvider,
    MockChainClient, MockDelegatorTransport, SendOptions, SignerError, SigningPrompt,
    TransactionManager, TransactionStatus, TransactionWrapper, TransferRequest,
};
use vekit_types::{
    abi::{ISimpleAccount, ISimpleAccountFactory},
    Address, Bytes, ErrorCategory, GasToken, InMemoryKeyValueStore, B256,
};

struct Setup {
    wrapper: TransactionWrapper<MockChainClient, MockDelegatorTransport>,
    chain: MockChainClient,
    sponsor: MockDelegatorTransport,
    accounts: DemoAccounts,
}

fn setup_with(
    version: u64,
    deployed: bool,
    store: InMemoryKeyValueStore,
    signer: Option<Rc<dyn AccountSigner>>,
) -> Setup {
    let scenario = DemoScenario::new(version, deployed);
    let mut config = KitConfig::default();
    config.broadcast_throttle_ms = 0;
    config.account_factory = scenario.chain.factory;
    config.retry_policy.initial_backoff_ms = 1;
    config.retry_policy.jitter_ms = 0;

    let accounts = scenario.accounts;
    let chain = MockChainClient::new(scenario.chain);
    let sponsor = MockDelegatorTransport::new(scenario.sponsor);
    let signer = signer.unwrap_or_else(|| {
        signer_for_connection(
            ConnectionKind::EmbeddedWallet,
            LocalKeyProvider::from_key(&accounts.owner_key).unwrap(),
        )
    });
    let registry = config.tokens;
    let manager = TransactionManager::new(
        chain.clone(),
        sponsor.clone(),
        signer,
        Box::new(KeyValuePreferenceStore::new(store)),
        config,
    )
    .unwrap();
    Setup {
        wrapper: TransactionWrapper::new(manager, accounts.owner, registry),
        chain,
        sponsor,
        accounts,
    }
}

fn setup(version: u64, deployed: bool) -> Setup {
    setup_with(version, deployed, InMemoryKeyValueStore::new(), None)
}

fn b3tr_transfer(accounts: &DemoAccounts, whole: u64) -> TransferRequest {
    TransferRequest {
        token: GasToken::B3tr,
        to: accounts.recipient,
        amount: tokens(whole),
    }
}

fn sign_requests(sponsor: &MockDelegatorTransport) -> usize {
    sponsor
        .with_sponsor(|sponsor| sponsor.sign_requests.len())
        .unwrap()
}

/// Wallet that closes its modal without signing.
struct RejectingWallet {
    address: Address,
}

#[async_trait(?Send)]
impl EmbeddedWalletProvider for RejectingWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_typed_data(
        &self,
        _data: &AuthorizationTypedData,
        _ui: Option<&SigningPrompt>,
    ) -> Result<Bytes, SignerError> {
        Err(SignerError::Rejected("user closed the modal".to_string()))
    }

    async fn sign_hash(
        &self,
        _hash: B256,
        _ui: Option<&SigningPrompt>,
    ) -> Result<Bytes, SignerError> {
        Err(SignerError::Rejected("user closed the modal".to_string()))
    }

    async fn export_wallet(&self) -> Result<(), SignerError> {
        Ok(())
    }
}

#[tokio::test]
async fn integration_delegated_b3tr_transfer_is_paid_by_sponsor() {
    LocalSet::new()
        .run_until(async {
            let s = setup(3, true);
            let tracked = s
                .wrapper
                .transfer(
                    b3tr_transfer(&s.accounts, 5),
                    SendOptions {
                        gas_token: Some(GasToken::B3tr),
                        ..SendOptions::delegated()
                    },
                )
                .unwrap();
            let settled = s.wrapper.manager().wait_for_settlement(tracked.id).await.unwrap();

            assert_eq!(settled.status, TransactionStatus::Confirmed);
            assert_eq!(settled.delegation_token, Some(GasToken::B3tr));
            let sponsor_address = s.sponsor.with_sponsor(|sponsor| sponsor.address()).unwrap();
            assert_eq!(settled.receipt.unwrap().gas_payer, sponsor_address);

            let submitted = s.chain.with_chain(|chain| chain.submitted.clone()).unwrap();
            assert_eq!(submitted.len(), 1);
            let tx = &submitted[0];
            assert!(tx.body.is_delegated());
            assert_eq!(tx.body.clauses.len(), 1);
            assert_eq!(tx.body.clauses[0].to, s.accounts.smart_account);
            let batch = ISimpleAccount::executeBatchWithAuthorizationCall::abi_decode(
                &tx.body.clauses[0].data,
            )
            .unwrap();
            // transfer, then the fee payment to the deposit account
            assert_eq!(batch.to.len(), 2);
            assert_eq!(settled.tx_id, Some(tx.id().unwrap()));
        })
        .await;
}

#[tokio::test]
async fn integration_undeployed_legacy_account_is_created_in_the_same_transaction() {
    LocalSet::new()
        .run_until(async {
            let s = setup(1, false);
            let tracked = s
                .wrapper
                .transfer(b3tr_transfer(&s.accounts, 1), SendOptions::delegated())
                .unwrap();
            let settled = s.wrapper.manager().wait_for_settlement(tracked.id).await.unwrap();
            assert_eq!(settled.status, TransactionStatus::Confirmed);
            assert_eq!(settled.delegation_token, Some(GasToken::Vtho));

            let submitted = s.chain.with_chain(|chain| chain.submitted.clone()).unwrap();
            let clauses = &submitted[0].body.clauses;
            assert_eq!(clauses.len(), 3);
            let create =
                ISimpleAccountFactory::createAccountCall::abi_decode(&clauses[0].data).unwrap();
            assert_eq!(create.owner, s.accounts.owner);
            for clause in &clauses[1..] {
                assert_eq!(clause.to, s.accounts.smart_account);
                let call = ISimpleAccount::executeWithAuthorizationCall::abi_decode(&clause.data);
                assert!(call.is_ok());
            }
        })
        .await;
}

#[tokio::test]
async fn integration_direct_payment_when_no_token_is_affordable() {
    LocalSet::new()
        .run_until(async {
            let s = setup(3, true);
            s.sponsor
                .with_sponsor(|sponsor| {
                    for token in GasToken::ALL {
                        sponsor.cost_per_clause_milli.insert(token, 1_000_000_000);
                    }
                })
                .unwrap();
            let tracked = s
                .wrapper
                .transfer(b3tr_transfer(&s.accounts, 1), SendOptions::delegated())
                .unwrap();
            let settled = s.wrapper.manager().wait_for_settlement(tracked.id).await.unwrap();

            assert_eq!(settled.status, TransactionStatus::Confirmed);
            assert_eq!(settled.delegation_token, None);
            assert_eq!(settled.receipt.unwrap().gas_payer, s.accounts.owner);
            assert_eq!(sign_requests(&s.sponsor), 0);
        })
        .await;
}

#[tokio::test]
async fn integration_eoa_transfer_is_sent_from_the_owner_as_built() {
    LocalSet::new()
        .run_until(async {
            let s = setup(3, true);
            let request = b3tr_transfer(&s.accounts, 2);
            let options = SendOptions {
                authorization: AuthorizationMode::DirectSignature,
                ..SendOptions::default()
            };
            let tracked = s.wrapper.transfer(request, options).unwrap();
            let settled = s.wrapper.manager().wait_for_settlement(tracked.id).await.unwrap();
            assert_eq!(settled.status, TransactionStatus::Confirmed);

            let submitted = s.chain.with_chain(|chain| chain.submitted.clone()).unwrap();
            let expected: Vec<_> = tracked.clauses.iter().map(|c| c.to_raw()).collect();
            assert_eq!(submitted[0].body.clauses, expected);
            assert_ne!(submitted[0].body.clauses[0].to, s.accounts.smart_account);
            assert_eq!(submitted[0].origin().unwrap(), s.accounts.owner);
            assert_eq!(sign_requests(&s.sponsor), 0);
        })
        .await;
}

#[tokio::test]
async fn integration_sponsor_refusal_is_terminal_and_nothing_is_broadcast() {
    LocalSet::new()
        .run_until(async {
            let s = setup(3, true);
            s.sponsor
                .with_sponsor(|sponsor| {
                    sponsor.sign_failure = Some("insufficient deposit".to_string())
                })
                .unwrap();
            let tracked = s
                .wrapper
                .transfer(b3tr_transfer(&s.accounts, 1), SendOptions::delegated())
                .unwrap();
            let settled = s.wrapper.manager().wait_for_settlement(tracked.id).await.unwrap();

            assert_eq!(settled.status, TransactionStatus::Failed);
            let err = settled.error.unwrap();
            assert_eq!(err.category, ErrorCategory::ProviderError);
            assert!(err.is_retryable());
            assert!(s.chain.with_chain(|chain| chain.submitted.is_empty()).unwrap());
            assert!(!s.wrapper.manager().cancel(tracked.id));
        })
        .await;
}

#[tokio::test]
async fn integration_wallet_rejection_is_user_rejection() {
    LocalSet::new()
        .run_until(async {
            let owner = DemoScenario::new(3, true).accounts.owner;
            let signer = signer_for_connection(
                ConnectionKind::CrossApp,
                RejectingWallet { address: owner },
            );
            let s = setup_with(3, true, InMemoryKeyValueStore::new(), Some(signer));
            let tracked = s
                .wrapper
                .transfer(b3tr_transfer(&s.accounts, 1), SendOptions::delegated())
                .unwrap();
            let settled = s.wrapper.manager().wait_for_settlement(tracked.id).await.unwrap();

            assert_eq!(settled.status, TransactionStatus::Failed);
            let err = settled.error.unwrap();
            assert_eq!(err.category, ErrorCategory::UserRejection);
            assert!(!err.is_retryable());
            assert_eq!(sign_requests(&s.sponsor), 0);
        })
        .await;
}

#[tokio::test]
async fn integration_cancel_before_broadcast() {
    LocalSet::new()
        .run_until(async {
            let s = setup(3, true);
            let manager = s.wrapper.manager();
            let tracked = s
                .wrapper
                .transfer(b3tr_transfer(&s.accounts, 1), SendOptions::delegated())
                .unwrap();
            assert_eq!(manager.get_pending_transactions().len(), 1);
            assert!(manager.cancel(tracked.id));

            let settled = manager.wait_for_settlement(tracked.id).await.unwrap();
            assert_eq!(settled.status, TransactionStatus::Cancelled);
            tokio::task::yield_now().await;
            assert!(s.chain.with_chain(|chain| chain.submitted.is_empty()).unwrap());
            let stored = manager.get_transaction(tracked.id).unwrap();
            assert_eq!(stored.status, TransactionStatus::Cancelled);
            assert_eq!(manager.clear_completed_transactions(), 1);
        })
        .await;
}

#[tokio::test]
async fn integration_gas_token_preferences_persist_and_steer_selection() {
    LocalSet::new()
        .run_until(async {
            let store = InMemoryKeyValueStore::new();
            let first = setup_with(3, true, store.clone(), None);
            first
                .wrapper
                .manager()
                .gas_token_selector()
                .toggle_token_exclusion(GasToken::Vtho)
                .unwrap();

            let second = setup_with(3, true, store, None);
            let selector = second.wrapper.manager().gas_token_selector();
            assert!(selector.preferences().is_excluded(GasToken::Vtho));

            let tracked = second
                .wrapper
                .transfer(b3tr_transfer(&second.accounts, 1), SendOptions::delegated())
                .unwrap();
            let settled = second
                .wrapper
                .manager()
                .wait_for_settlement(tracked.id)
                .await
                .unwrap();
            assert_eq!(settled.status, TransactionStatus::Confirmed);
            assert_eq!(settled.delegation_token, Some(GasToken::B3tr));
            let quoted = second
                .sponsor
                .with_sponsor(|sponsor| {
                    sponsor
                        .estimate_requests
                        .iter()
                        .any(|(token, _, _)| *token == GasToken::Vtho)
                })
                .unwrap();
            assert!(!quoted);
        })
        .await;
}

#[tokio::test]
async fn integration_invalid_transfers_are_rejected_before_registration() {
    let s = setup(3, true);
    let zero_amount = TransferRequest {
        token: GasToken::Vet,
        to: s.accounts.recipient,
        amount: Default::default(),
    };
    assert!(s.wrapper.transfer(zero_amount, SendOptions::default()).is_err());
    let to_zero = TransferRequest {
        to: Address::ZERO,
        ..b3tr_transfer(&s.accounts, 1)
    };
    assert!(s.wrapper.transfer(to_zero, SendOptions::default()).is_err());
    assert!(s.wrapper.manager().get_pending_transactions().is_empty());
}
