//! GasTokenSelector: token-priority preferences and first-affordable gas token selection.

use std::{cell::RefCell, collections::BTreeSet};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use vekit_types::{
    clause::decimal_u256, Address, Clause, GasToken, KeyValueStore, StoreError, ValidationError,
    U256,
};

use crate::chain::ChainError;

pub const PREFERENCES_KEY: &str = "vekit.gas-token-preferences";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasTokenPreferences {
    pub token_priority: Vec<GasToken>,
    #[serde(default)]
    pub excluded_tokens: BTreeSet<GasToken>,
}

impl Default for GasTokenPreferences {
    fn default() -> Self {
        Self {
            token_priority: vec![GasToken::Vtho, GasToken::B3tr, GasToken::Vet],
            excluded_tokens: BTreeSet::new(),
        }
    }
}

impl GasTokenPreferences {
    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_unique(&self.token_priority)
    }

    pub fn is_excluded(&self, token: GasToken) -> bool {
        self.excluded_tokens.contains(&token)
    }

    /// Priority order with excluded tokens removed.
    pub fn eligible(&self) -> impl Iterator<Item = GasToken> + '_ {
        self.token_priority
            .iter()
            .copied()
            .filter(|token| !self.is_excluded(*token))
    }
}

fn ensure_unique(tokens: &[GasToken]) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for token in tokens {
        if !seen.insert(*token) {
            return Err(ValidationError::Message(format!(
                "duplicate token {token} in priority list"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GasTokenError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub trait PreferenceStore {
    fn load(&self) -> Result<Option<GasTokenPreferences>, StoreError>;

    fn save(&self, preferences: &GasTokenPreferences) -> Result<(), StoreError>;
}

impl<T: PreferenceStore + ?Sized> PreferenceStore for Box<T> {
    fn load(&self) -> Result<Option<GasTokenPreferences>, StoreError> {
        (**self).load()
    }

    fn save(&self, preferences: &GasTokenPreferences) -> Result<(), StoreError> {
        (**self).save(preferences)
    }
}

/// Persists preferences as JSON under a single key.
#[derive(Debug, Clone)]
pub struct KeyValuePreferenceStore<K> {
    store: K,
    key: String,
}

impl<K: KeyValueStore> KeyValuePreferenceStore<K> {
    pub fn new(store: K) -> Self {
        Self::with_key(store, PREFERENCES_KEY)
    }

    pub fn with_key(store: K, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

impl<K: KeyValueStore> PreferenceStore for KeyValuePreferenceStore<K> {
    fn load(&self) -> Result<Option<GasTokenPreferences>, StoreError> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| StoreError::Corrupt {
                key: self.key.clone(),
                message: err.to_string(),
            })
    }

    fn save(&self, preferences: &GasTokenPreferences) -> Result<(), StoreError> {
        let raw = serde_json::to_string(preferences).map_err(|err| StoreError::Corrupt {
            key: self.key.clone(),
            message: err.to_string(),
        })?;
        self.store.set(&self.key, raw)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PricingError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("sponsor quote failed: {0}")]
    Sponsor(String),
    #[error("malformed amount: {0}")]
    Amount(String),
}

/// Cost and balance lookups for one gas token.
#[async_trait(?Send)]
pub trait GasTokenPricing {
    async fn cost_in_token(
        &self,
        token: GasToken,
        clauses: &[Clause],
        account: Address,
    ) -> Result<U256, PricingError>;

    async fn balance_of(&self, token: GasToken, account: Address) -> Result<U256, PricingError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasTokenCost {
    pub token: GasToken,
    #[serde(with = "decimal_u256")]
    pub cost: U256,
    #[serde(with = "decimal_u256")]
    pub balance: U256,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasTokenSelection {
    pub token: GasToken,
    #[serde(with = "decimal_u256")]
    pub cost: U256,
    #[serde(with = "decimal_u256")]
    pub balance: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredTokenAvailability {
    pub preferred: Option<GasTokenCost>,
    pub has_sufficient_balance: bool,
    pub alternatives: Vec<GasTokenCost>,
}

pub struct GasTokenSelector<P, S> {
    pricing: P,
    store: S,
    preferences: RefCell<GasTokenPreferences>,
}

impl<P: GasTokenPricing, S: PreferenceStore> GasTokenSelector<P, S> {
    /// Loads saved preferences; missing or unreadable entries fall back to defaults.
    pub fn new(pricing: P, store: S) -> Result<Self, GasTokenError> {
        let preferences = match store.load() {
            Ok(Some(saved)) if saved.validate().is_ok() => saved,
            Ok(Some(_)) => {
                warn!("stored gas token preferences are invalid; using defaults");
                GasTokenPreferences::default()
            }
            Ok(None) => GasTokenPreferences::default(),
            Err(StoreError::Corrupt { key, message }) => {
                warn!(
                    key = %key,
                    error = %message,
                    "unreadable gas token preferences; using defaults"
                );
                GasTokenPreferences::default()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            pricing,
            store,
            preferences: RefCell::new(preferences),
        })
    }

    pub fn preferences(&self) -> GasTokenPreferences {
        self.preferences.borrow().clone()
    }

    pub fn update_preferences(
        &self,
        preferences: GasTokenPreferences,
    ) -> Result<GasTokenPreferences, GasTokenError> {
        preferences.validate()?;
        self.store.save(&preferences)?;
        *self.preferences.borrow_mut() = preferences.clone();
        debug!(
            priority = ?preferences.token_priority,
            excluded = ?preferences.excluded_tokens,
            "gas token preferences updated"
        );
        Ok(preferences)
    }

    pub fn reorder_token_priority(
        &self,
        order: Vec<GasToken>,
    ) -> Result<GasTokenPreferences, GasTokenError> {
        if order.is_empty() {
            return Err(ValidationError::MissingField("tokenPriority").into());
        }
        ensure_unique(&order)?;
        let mut next = self.preferences();
        next.token_priority = order;
        self.update_preferences(next)
    }

    pub fn toggle_token_exclusion(
        &self,
        token: GasToken,
    ) -> Result<GasTokenPreferences, GasTokenError> {
        let mut next = self.preferences();
        if !next.excluded_tokens.remove(&token) {
            next.excluded_tokens.insert(token);
        }
        self.update_preferences(next)
    }

    pub fn reset_to_defaults(&self) -> Result<GasTokenPreferences, GasTokenError> {
        self.update_preferences(GasTokenPreferences::default())
    }

    /// Costs for every eligible token in priority order. Balances are read fresh on every call.
    pub async fn estimate_gas_costs(
        &self,
        clauses: &[Clause],
        account: Address,
    ) -> Vec<GasTokenCost> {
        let tokens: Vec<GasToken> = self.preferences.borrow().eligible().collect();
        join_all(
            tokens
                .into_iter()
                .map(|token| self.estimate_token(token, clauses, account)),
        )
        .await
    }

    pub async fn select_optimal_gas_token(
        &self,
        clauses: &[Clause],
        account: Address,
    ) -> Option<GasTokenSelection> {
        let selection = self
            .estimate_gas_costs(clauses, account)
            .await
            .into_iter()
            .find(|cost| cost.available)
            .map(|cost| GasTokenSelection {
                token: cost.token,
                cost: cost.cost,
                balance: cost.balance,
            });
        match &selection {
            Some(selected) => {
                debug!(token = %selected.token, cost = %selected.cost, "selected gas token")
            }
            None => debug!(account = %account, "no affordable gas token"),
        }
        selection
    }

    /// Whether `preferred` (or the top eligible token) covers the cost,
    /// plus the affordable alternatives.
    pub async fn check_preferred_token_availability(
        &self,
        clauses: &[Clause],
        account: Address,
        preferred: Option<GasToken>,
    ) -> PreferredTokenAvailability {
        let costs = self.estimate_gas_costs(clauses, account).await;
        let target = preferred.or_else(|| costs.first().map(|cost| cost.token));
        let preferred_cost = match target {
            Some(token) => match costs.iter().find(|cost| cost.token == token) {
                Some(cost) => Some(cost.clone()),
                None => Some(self.estimate_token(token, clauses, account).await),
            },
            None => None,
        };
        let alternatives = costs
            .into_iter()
            .filter(|cost| cost.available && Some(cost.token) != target)
            .collect();
        PreferredTokenAvailability {
            has_sufficient_balance: preferred_cost.as_ref().is_some_and(|cost| cost.available),
            preferred: preferred_cost,
            alternatives,
        }
    }

    async fn estimate_token(
        &self,
        token: GasToken,
        clauses: &[Clause],
        account: Address,
    ) -> GasTokenCost {
        let cost = self.pricing.cost_in_token(token, clauses, account).await;
        let balance = self.pricing.balance_of(token, account).await;
        match (cost, balance) {
            (Ok(cost), Ok(balance)) => GasTokenCost {
                token,
                cost,
                balance,
                available: balance >= cost,
            },
            (Err(err), _) | (_, Err(err)) => {
                warn!(token = %token, error = %err, "gas token estimate failed");
                GasTokenCost {
                    token,
                    cost: U256::ZERO,
                    balance: U256::ZERO,
                    available: false,
                }
            }
        }
    }
}
