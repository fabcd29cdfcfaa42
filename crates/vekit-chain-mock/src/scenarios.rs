use alloy_primitives::{address, Address, U256};
use alloy_signer_local::PrivateKeySigner;

use crate::{mock_chain::MockChain, mock_sponsor::MockSponsor};

pub const DEMO_CHAIN_TAG: u8 = 0x27;
pub const DEMO_FACTORY: Address = address!("0x713b908bcf77f3e00efef328e50b657a1a23aeaf");
pub const DEMO_VTHO: Address = address!("0x0000000000000000000000000000456e65726779");
pub const DEMO_B3TR: Address = address!("0xbf64cf86894ee0877c4e7d03936e35ee8d8b864f");

const ONE_TOKEN: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy)]
pub struct DemoAccounts {
    pub owner_key: [u8; 32],
    pub owner: Address,
    pub smart_account: Address,
    pub recipient: Address,
    pub deposit_account: Address,
}

#[derive(Debug, Clone)]
pub struct DemoScenario {
    pub accounts: DemoAccounts,
    pub chain: MockChain,
    pub sponsor: MockSponsor,
}

impl DemoScenario {
    /// Owner with a smart account of `version`, deployed or not, funded with
    /// 10 VET, 100 VTHO, and 50 B3TR.
    pub fn new(version: u64, deployed: bool) -> Self {
        let owner_key = [0x11; 32];
        let owner = signer_address(owner_key);
        let deposit_account = address!("0x00000000000000000000000000000000000de905");

        let mut chain = MockChain::new(DEMO_CHAIN_TAG, DEMO_FACTORY, DEMO_VTHO);
        chain.current_account_version = version;
        let smart_account = if deployed {
            chain.deploy_account(owner, version)
        } else {
            chain.smart_account_address(owner)
        };
        chain.set_balance(smart_account, tokens(10));
        chain.set_energy(smart_account, tokens(100));
        chain.set_token_balance(DEMO_B3TR, smart_account, tokens(50));

        let sponsor = MockSponsor::new(
            PrivateKeySigner::from_slice(&[0x5b; 32]).expect("static sponsor key is valid"),
            deposit_account,
        );

        Self {
            accounts: DemoAccounts {
                owner_key,
                owner,
                smart_account,
                recipient: address!("0x00000000000000000000000000000000000000b0"),
                deposit_account,
            },
            chain,
            sponsor,
        }
    }
}

pub fn tokens(whole: u64) -> U256 {
    U256::from(whole) * U256::from(ONE_TOKEN)
}

fn signer_address(key: [u8; 32]) -> Address {
    PrivateKeySigner::from_slice(&key)
        .expect("static demo key is valid")
        .address()
}
