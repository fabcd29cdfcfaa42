//! Token transfer helpers and the `TransactionWrapper` facade over the manager.

use thiserror::Error;
use tracing::debug;
use vekit_types::{Address, Clause, GasToken, ValidationError, U256};

use crate::{
    chain::ChainClient,
    config::TokenRegistry,
    delegator::DelegatorTransport,
    manager::{
        AuthorizationMode, ManagerError, TrackedTransaction, TransactionIntent, TransactionManager,
    },
    signer::SigningPrompt,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// Clause moving `amount` base units of `token` to `to`.
pub fn transfer_clause(
    registry: &TokenRegistry,
    token: GasToken,
    to: Address,
    amount: U256,
) -> Result<Clause, ValidationError> {
    if amount.is_zero() {
        return Err(ValidationError::InvalidField("amount"));
    }
    if to == Address::ZERO {
        return Err(ValidationError::InvalidField("to"));
    }
    let clause = match registry.contract(token) {
        None => Clause::transfer_vet(to, amount),
        Some(contract) => Clause::erc20_transfer(contract, to, amount),
    };
    Ok(clause.with_comment(format!("Transfer {} to {to}", token.symbol())))
}

/// One requested transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub token: GasToken,
    pub to: Address,
    pub amount: U256,
}

/// How a wrapped send is paid for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub delegated: bool,
    pub authorization: AuthorizationMode,
    pub gas_token: Option<GasToken>,
    pub max_gas: Option<u64>,
    pub ui_hints: Option<SigningPrompt>,
}

impl SendOptions {
    pub fn delegated() -> Self {
        Self {
            delegated: true,
            ..Self::default()
        }
    }
}

/// Turns high-level requests into intents for the connected signer.
pub struct TransactionWrapper<C, D> {
    manager: TransactionManager<C, D>,
    owner: Address,
    registry: TokenRegistry,
}

impl<C, D> TransactionWrapper<C, D>
where
    C: ChainClient + Clone + 'static,
    D: DelegatorTransport + 'static,
{
    pub fn new(manager: TransactionManager<C, D>, owner: Address, registry: TokenRegistry) -> Self {
        Self {
            manager,
            owner,
            registry,
        }
    }

    pub fn manager(&self) -> &TransactionManager<C, D> {
        &self.manager
    }

    pub fn transfer(
        &self,
        request: TransferRequest,
        options: SendOptions,
    ) -> Result<TrackedTransaction, TransferError> {
        self.transfer_batch(&[request], options)
    }

    /// Several transfers executed in order within a single transaction.
    pub fn transfer_batch(
        &self,
        requests: &[TransferRequest],
        options: SendOptions,
    ) -> Result<TrackedTransaction, TransferError> {
        let clauses = requests
            .iter()
            .map(|r| transfer_clause(&self.registry, r.token, r.to, r.amount))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(transfers = clauses.len(), "built transfer clauses");
        self.send_clauses(clauses, options)
    }

    pub fn send_clauses(
        &self,
        clauses: Vec<Clause>,
        options: SendOptions,
    ) -> Result<TrackedTransaction, TransferError> {
        let mut intent = TransactionIntent::new(self.owner, clauses)
            .delegated(options.delegated)
            .with_authorization(options.authorization);
        intent.gas_token = options.gas_token;
        intent.max_gas = options.max_gas;
        intent.ui_hints = options.ui_hints;
        Ok(self.manager.send(intent)?)
    }
}
