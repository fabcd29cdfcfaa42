//! MockChain: in-memory node with accounts, smart-account factory, gas simulation, and tx pool.

use std::collections::HashMap;

use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_sol_types::{SolCall, SolValue};
use vekit_types::{
    abi::{IERC20, ISimpleAccount, ISimpleAccountFactory},
    RawClause, SignedTransaction, TransactionBody, TxId, FEATURE_DELEGATED,
};

/// Fixed transaction overhead charged by the simulated node.
pub const TX_GAS: u64 = 5_000;
/// Per-clause overhead charged by the simulated node.
pub const CLAUSE_GAS: u64 = 16_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockChainError {
    Unavailable(String),
    Rejected(String),
    NotFound(TxId),
}

/// How `estimate_gas` answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstimateMode {
    Normal,
    Unreachable,
    Revert(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEstimate {
    pub total_gas: u64,
    pub reverted: bool,
    pub revert_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockAccount {
    pub balance: U256,
    pub energy: U256,
    pub code: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockReceipt {
    pub tx_id: TxId,
    pub reverted: bool,
    pub gas_used: u64,
    pub gas_payer: Address,
    pub block_number: u64,
}

#[derive(Debug, Clone)]
pub struct MockChain {
    pub chain_tag: u8,
    pub best_block: u64,
    pub factory: Address,
    pub energy_token: Address,
    pub current_account_version: u64,
    pub accounts: HashMap<Address, MockAccount>,
    pub account_versions: HashMap<Address, u64>,
    pub token_balances: HashMap<(Address, Address), U256>,
    pub estimate_mode: EstimateMode,
    pub estimate_calls: u32,
    pub reject_submissions: Option<String>,
    pub revert_receipts: bool,
    pub submitted: Vec<SignedTransaction>,
    next_nonce: u64,
}

impl MockChain {
    pub fn new(chain_tag: u8, factory: Address, energy_token: Address) -> Self {
        Self {
            chain_tag,
            best_block: 1_000,
            factory,
            energy_token,
            current_account_version: 3,
            accounts: HashMap::new(),
            account_versions: HashMap::new(),
            token_balances: HashMap::new(),
            estimate_mode: EstimateMode::Normal,
            estimate_calls: 0,
            reject_submissions: None,
            revert_receipts: false,
            submitted: Vec::new(),
            next_nonce: 1,
        }
    }

    /// Deterministic counterfactual smart-account address for `owner`.
    pub fn smart_account_address(&self, owner: Address) -> Address {
        let mut preimage = Vec::with_capacity(40);
        preimage.extend_from_slice(self.factory.as_slice());
        preimage.extend_from_slice(owner.as_slice());
        Address::from_slice(&keccak256(preimage)[12..])
    }

    pub fn deploy_account(&mut self, owner: Address, version: u64) -> Address {
        let account = self.smart_account_address(owner);
        self.accounts.entry(account).or_default().code = Bytes::from_static(&[0x60, 0x80]);
        self.account_versions.insert(account, version);
        account
    }

    pub fn set_balance(&mut self, address: Address, balance: U256) {
        self.accounts.entry(address).or_default().balance = balance;
    }

    pub fn set_energy(&mut self, address: Address, energy: U256) {
        self.accounts.entry(address).or_default().energy = energy;
    }

    pub fn set_token_balance(&mut self, token: Address, owner: Address, amount: U256) {
        self.token_balances.insert((token, owner), amount);
    }

    pub fn account(&self, address: Address) -> MockAccount {
        self.accounts.get(&address).cloned().unwrap_or_default()
    }

    pub fn code(&self, address: Address) -> Bytes {
        self.account(address).code
    }

    pub fn estimate_gas(
        &mut self,
        clauses: &[RawClause],
        _caller: Option<Address>,
    ) -> Result<MockEstimate, MockChainError> {
        self.estimate_calls += 1;
        match &self.estimate_mode {
            EstimateMode::Unreachable => {
                Err(MockChainError::Unavailable("node unreachable".to_string()))
            }
            EstimateMode::Revert(reason) => Ok(MockEstimate {
                total_gas: 0,
                reverted: true,
                revert_reason: Some(reason.clone()),
            }),
            EstimateMode::Normal => Ok(MockEstimate {
                total_gas: intrinsic_gas(clauses),
                reverted: false,
                revert_reason: None,
            }),
        }
    }

    pub fn build_body(
        &mut self,
        clauses: &[RawClause],
        gas: u64,
        delegated: bool,
    ) -> TransactionBody {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        TransactionBody {
            chain_tag: self.chain_tag,
            block_ref: self.best_block,
            expiration: 32,
            clauses: clauses.to_vec(),
            gas_price_coef: 0,
            gas,
            depends_on: Bytes::new(),
            nonce,
            reserved: if delegated {
                vec![FEATURE_DELEGATED]
            } else {
                Vec::new()
            },
        }
    }

    pub fn submit(&mut self, raw: &[u8]) -> Result<TxId, MockChainError> {
        if let Some(reason) = &self.reject_submissions {
            return Err(MockChainError::Rejected(reason.clone()));
        }
        let tx = SignedTransaction::decode(raw)
            .map_err(|err| MockChainError::Rejected(format!("bad tx: {err}")))?;
        if !tx.is_fully_signed() {
            return Err(MockChainError::Rejected("missing sponsor signature".to_string()));
        }
        if tx.body.chain_tag != self.chain_tag {
            return Err(MockChainError::Rejected("chain tag mismatch".to_string()));
        }
        tx.delegator()
            .map_err(|err| MockChainError::Rejected(format!("bad signature: {err}")))?;
        let id = tx
            .id()
            .map_err(|err| MockChainError::Rejected(format!("bad signature: {err}")))?;
        self.submitted.push(tx);
        Ok(id)
    }

    pub fn receipt(&self, tx_id: TxId) -> Result<MockReceipt, MockChainError> {
        let tx = self
            .submitted
            .iter()
            .find(|tx| tx.id().ok() == Some(tx_id))
            .ok_or(MockChainError::NotFound(tx_id))?;
        let origin = tx
            .origin()
            .map_err(|err| MockChainError::Rejected(err.to_string()))?;
        let gas_payer = tx
            .delegator()
            .map_err(|err| MockChainError::Rejected(err.to_string()))?
            .unwrap_or(origin);
        Ok(MockReceipt {
            tx_id,
            reverted: self.revert_receipts,
            gas_used: intrinsic_gas(&tx.body.clauses).min(tx.body.gas),
            gas_payer,
            block_number: self.best_block + 1,
        })
    }

    /// Read-only contract call. Supports the account factory, smart accounts, and token balances.
    pub fn call(&self, to: Address, data: &[u8]) -> Result<Bytes, MockChainError> {
        if to == self.factory {
            if let Ok(call) = ISimpleAccountFactory::getAccountAddressCall::abi_decode(data) {
                return Ok(self.smart_account_address(call.owner).abi_encode().into());
            }
            if ISimpleAccountFactory::currentAccountImplementationVersionCall::abi_decode(data)
                .is_ok()
            {
                return Ok(U256::from(self.current_account_version).abi_encode().into());
            }
        }
        if ISimpleAccount::versionCall::abi_decode(data).is_ok() {
            let version = self
                .account_versions
                .get(&to)
                .copied()
                .ok_or_else(|| MockChainError::Rejected("execution reverted".to_string()))?;
            return Ok(U256::from(version).abi_encode().into());
        }
        if let Ok(call) = IERC20::balanceOfCall::abi_decode(data) {
            let balance = if to == self.energy_token {
                self.account(call.owner).energy
            } else {
                self.token_balances
                    .get(&(to, call.owner))
                    .copied()
                    .unwrap_or_default()
            };
            return Ok(balance.abi_encode().into());
        }
        Err(MockChainError::Rejected("execution reverted".to_string()))
    }
}

pub fn intrinsic_gas(clauses: &[RawClause]) -> u64 {
    let data_gas: u64 = clauses
        .iter()
        .flat_map(|clause| clause.data.iter())
        .map(|byte| if *byte == 0 { 4 } else { 68 })
        .sum();
    TX_GAS + CLAUSE_GAS * clauses.len() as u64 + data_gas
}
