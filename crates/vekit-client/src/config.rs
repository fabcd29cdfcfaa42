//! KitConfig: network selection, sponsor endpoint, timeouts, and token contract registry.

use std::str::FromStr;

use alloy_primitives::address;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vekit_types::{Address, GasToken, ValidationError, U256};

use crate::{
    chain::{RequestMeta, RetryPolicy},
    gas::MAX_GAS_PADDING,
};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_GAS_PADDING: f64 = 0.15;
pub const DEFAULT_AUTHORIZATION_VALIDITY_SECS: u64 = 3_600;
pub const DEFAULT_BROADCAST_THROTTLE_MS: u64 = 100;

const VTHO: Address = address!("0x0000000000000000000000000000456e65726779");
const MAINNET_B3TR: Address = address!("0x5ef79995fe8a89e0812330e4378eb2660cede699");
const TESTNET_B3TR: Address = address!("0xbf64cf86894ee0877c4e7d03936e35ee8d8b864f");
const MAINNET_FACTORY: Address = address!("0xc06ad8573022e2be416ca89da47e8c592971679a");
const TESTNET_FACTORY: Address = address!("0x713b908bcf77f3e00efef328e50b657a1a23aeaf");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Solo,
}

impl Network {
    /// Genesis-derived chain tag carried in every transaction body.
    pub fn chain_tag(&self) -> u8 {
        match self {
            Self::Mainnet => 0x4a,
            Self::Testnet => 0x27,
            Self::Solo => 0xf6,
        }
    }
}

impl FromStr for Network {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "solo" => Ok(Self::Solo),
            other => Err(ValidationError::Message(format!("unknown network `{other}`"))),
        }
    }
}

/// Contract addresses of the ERC-20 style gas tokens. VET is native and has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRegistry {
    pub vtho: Address,
    pub b3tr: Address,
}

impl TokenRegistry {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self {
                vtho: VTHO,
                b3tr: MAINNET_B3TR,
            },
            Network::Testnet | Network::Solo => Self {
                vtho: VTHO,
                b3tr: TESTNET_B3TR,
            },
        }
    }

    pub fn contract(&self, token: GasToken) -> Option<Address> {
        match token {
            GasToken::Vet => None,
            GasToken::Vtho => Some(self.vtho),
            GasToken::B3tr => Some(self.b3tr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KitConfig {
    pub network: Network,
    pub chain_tag: u8,
    /// EIP-712 domain chain id used for smart-account authorizations.
    pub chain_id: U256,
    pub delegator_url: String,
    pub request_timeout_ms: u64,
    pub retry_policy: RetryPolicy,
    pub gas_padding: f64,
    pub authorization_validity_secs: u64,
    pub broadcast_throttle_ms: u64,
    pub account_factory: Address,
    pub tokens: TokenRegistry,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self::for_network(Network::Testnet)
    }
}

impl KitConfig {
    pub fn for_network(network: Network) -> Self {
        let (delegator_url, account_factory) = match network {
            Network::Mainnet => (
                "https://mainnet.delegator.vechain.org/api/v1/",
                MAINNET_FACTORY,
            ),
            Network::Testnet => (
                "https://testnet.delegator.vechain.org/api/v1/",
                TESTNET_FACTORY,
            ),
            Network::Solo => ("http://localhost:3000/api/v1/", TESTNET_FACTORY),
        };
        Self {
            network,
            chain_tag: network.chain_tag(),
            chain_id: U256::from(network.chain_tag()),
            delegator_url: delegator_url.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry_policy: RetryPolicy::default(),
            gas_padding: DEFAULT_GAS_PADDING,
            authorization_validity_secs: DEFAULT_AUTHORIZATION_VALIDITY_SECS,
            broadcast_throttle_ms: DEFAULT_BROADCAST_THROTTLE_MS,
            account_factory,
            tokens: TokenRegistry::for_network(network),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=MAX_GAS_PADDING).contains(&self.gas_padding) {
            return Err(ValidationError::InvalidField("gasPadding"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ValidationError::InvalidField("requestTimeoutMs"));
        }
        if self.authorization_validity_secs == 0 {
            return Err(ValidationError::InvalidField("authorizationValiditySecs"));
        }
        if self.account_factory == Address::ZERO {
            return Err(ValidationError::MissingField("accountFactory"));
        }
        Ok(())
    }

    pub fn request_meta(&self) -> RequestMeta {
        RequestMeta {
            timeout_ms: self.request_timeout_ms,
            retry_policy: self.retry_policy.clone(),
        }
    }
}
