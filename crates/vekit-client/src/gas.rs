//! GasEstimator: node-backed gas estimation with a per-clause fallback.

use tracing::{debug, warn};
use vekit_types::{Address, Clause};

use crate::chain::{node_request, ChainClient, RequestMeta};

/// Gas assumed per clause when the node cannot produce an estimate.
pub const FALLBACK_GAS_PER_CLAUSE: u64 = 21_000;

pub fn fallback_gas(clause_count: usize) -> u64 {
    FALLBACK_GAS_PER_CLAUSE.saturating_mul(clause_count as u64)
}

/// Largest accepted padding ratio (ten times the estimate on top of the estimate).
pub const MAX_GAS_PADDING: f64 = 10.0;

/// Scales `gas` by `1 + ratio` at basis-point precision, rounding up.
///
/// `ratio` is clamped to `MAX_GAS_PADDING`; the result saturates at `u64::MAX`.
pub fn apply_gas_padding(gas: u64, ratio: f64) -> u64 {
    if !ratio.is_finite() || ratio <= 0.0 {
        return gas;
    }
    let bps = (ratio.min(MAX_GAS_PADDING) * 10_000.0).round() as u128;
    let padded = u128::from(gas)
        .saturating_mul(10_000 + bps)
        .div_ceil(10_000);
    u64::try_from(padded).unwrap_or(u64::MAX)
}

pub struct GasEstimator<C> {
    chain: C,
    meta: RequestMeta,
}

impl<C: ChainClient> GasEstimator<C> {
    pub fn new(chain: C, meta: RequestMeta) -> Self {
        Self { chain, meta }
    }

    /// Never fails: node errors and reverted simulations degrade to `fallback_gas`.
    pub async fn estimate(&self, clauses: &[Clause], caller: Option<Address>) -> u64 {
        let result = node_request(&self.meta, "estimate_gas", || {
            self.chain.estimate_gas(clauses, caller)
        })
        .await;
        match result {
            Ok(estimate) if !estimate.reverted => {
                debug!(clauses = clauses.len(), gas = estimate.total_gas, "gas estimated");
                estimate.total_gas
            }
            Ok(estimate) => {
                let fallback = fallback_gas(clauses.len());
                warn!(
                    reason = estimate.revert_reason.as_deref().unwrap_or("unknown"),
                    fallback,
                    "gas simulation reverted; using fallback"
                );
                fallback
            }
            Err(err) => {
                let fallback = fallback_gas(clauses.len());
                warn!(error = %err, fallback, "gas estimation failed; using fallback");
                fallback
            }
        }
    }
}
