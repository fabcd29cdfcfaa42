//! MockSponsor: in-memory generic delegator that quotes costs and co-signs delegated transactions.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, Bytes};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use vekit_types::{signature_bytes, GasToken, SignedTransaction};

/// Sign endpoint answer, shaped like the sponsor's JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSignOutcome {
    pub status_code: Option<u16>,
    pub message: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MockSponsor {
    signer: PrivateKeySigner,
    pub deposit_account: Address,
    /// Cost per clause in thousandths of a whole token.
    pub cost_per_clause_milli: HashMap<GasToken, u64>,
    pub failing_estimates: HashSet<GasToken>,
    pub sign_failure: Option<String>,
    pub estimate_requests: Vec<(GasToken, usize, Address)>,
    pub sign_requests: Vec<(GasToken, Address)>,
}

impl MockSponsor {
    pub fn new(signer: PrivateKeySigner, deposit_account: Address) -> Self {
        Self {
            signer,
            deposit_account,
            cost_per_clause_milli: HashMap::from([
                (GasToken::Vet, 250),
                (GasToken::Vtho, 1_500),
                (GasToken::B3tr, 400),
            ]),
            failing_estimates: HashSet::new(),
            sign_failure: None,
            estimate_requests: Vec::new(),
            sign_requests: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Quoted cost in whole tokens, as the sponsor's `transactionCost` number.
    pub fn estimate(
        &mut self,
        token: GasToken,
        clause_count: usize,
        signer: Address,
    ) -> Result<f64, String> {
        self.estimate_requests.push((token, clause_count, signer));
        if self.failing_estimates.contains(&token) {
            return Err(format!("price feed for {token} unavailable"));
        }
        let milli = self.cost_per_clause_milli.get(&token).copied().unwrap_or(0);
        Ok((milli * clause_count as u64) as f64 / 1_000.0)
    }

    pub fn sign(&mut self, token: GasToken, raw_hex: &str, origin: Address) -> MockSignOutcome {
        self.sign_requests.push((token, origin));
        if let Some(message) = &self.sign_failure {
            return failure(message.clone());
        }
        let raw = match hex::decode(raw_hex.trim_start_matches("0x")) {
            Ok(raw) => raw,
            Err(err) => return failure(format!("invalid raw: {err}")),
        };
        let tx = match SignedTransaction::decode(&raw) {
            Ok(tx) => tx,
            Err(err) => return failure(format!("invalid transaction: {err}")),
        };
        if !tx.body.is_delegated() {
            return failure("transaction is not marked delegated".to_string());
        }
        match tx.origin() {
            Ok(recovered) if recovered == origin => {}
            _ => return failure("origin does not match sender signature".to_string()),
        }
        match self
            .signer
            .sign_hash_sync(&tx.body.delegation_hash(origin))
        {
            Ok(sig) => MockSignOutcome {
                status_code: None,
                message: None,
                signature: Some(Bytes::from(signature_bytes(&sig).to_vec()).to_string()),
            },
            Err(err) => failure(err.to_string()),
        }
    }
}

fn failure(message: String) -> MockSignOutcome {
    MockSignOutcome {
        status_code: Some(500),
        message: Some(message),
        signature: None,
    }
}
