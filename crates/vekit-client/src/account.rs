//! SmartAccountResolver: locate the owner's smart account, its deployment state, and version.

use alloy_sol_types::{SolCall, SolValue};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vekit_types::{
    abi::{ISimpleAccount, ISimpleAccountFactory},
    Address, Clause, U256,
};

use crate::chain::{node_request, ChainClient, ChainError, RequestMeta};

/// First account implementation that verifies batched authorizations.
pub const BATCH_AUTHORIZATION_VERSION: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartAccount {
    pub address: Address,
    pub owner: Address,
    pub version: u64,
    pub deployed: bool,
    pub factory: Address,
}

impl SmartAccount {
    pub fn supports_batch_authorization(&self) -> bool {
        self.version >= BATCH_AUTHORIZATION_VERSION
    }
}

pub struct SmartAccountResolver<C> {
    chain: C,
    factory: Address,
    meta: RequestMeta,
}

impl<C: ChainClient> SmartAccountResolver<C> {
    pub fn new(chain: C, factory: Address, meta: RequestMeta) -> Self {
        Self {
            chain,
            factory,
            meta,
        }
    }

    pub async fn resolve(&self, owner: Address) -> Result<SmartAccount, ChainError> {
        let lookup = Clause::call(
            self.factory,
            ISimpleAccountFactory::getAccountAddressCall { owner }.abi_encode(),
        );
        let out = self.read(&lookup).await?;
        let address = Address::abi_decode(&out)
            .map_err(|err| ChainError::Internal(format!("getAccountAddress: {err}")))?;

        let code =
            node_request(&self.meta, "get_bytecode", || self.chain.get_bytecode(address)).await?;
        let deployed = !code.is_empty();

        let version_query = if deployed {
            Clause::call(address, ISimpleAccount::versionCall {}.abi_encode())
        } else {
            Clause::call(
                self.factory,
                ISimpleAccountFactory::currentAccountImplementationVersionCall {}.abi_encode(),
            )
        };
        let out = self.read(&version_query).await?;
        let version = U256::abi_decode(&out)
            .map_err(|err| ChainError::Internal(format!("version: {err}")))?;
        let version = u64::try_from(version)
            .map_err(|_| ChainError::Internal(format!("version {version} out of range")))?;

        debug!(owner = %owner, account = %address, deployed, version, "resolved smart account");
        Ok(SmartAccount {
            address,
            owner,
            version,
            deployed,
            factory: self.factory,
        })
    }

    async fn read(&self, clause: &Clause) -> Result<vekit_types::Bytes, ChainError> {
        node_request(&self.meta, "call", || self.chain.call(clause, None)).await
    }
}
