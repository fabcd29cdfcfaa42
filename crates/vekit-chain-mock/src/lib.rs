//! In-memory chain node and fee sponsor for testing without real infrastructure.

pub mod mock_chain;
pub mod mock_sponsor;
pub mod scenarios;

pub use mock_chain::{
    intrinsic_gas, EstimateMode, MockAccount, MockChain, MockChainError, MockEstimate,
    MockReceipt,
};
pub use mock_sponsor::{MockSignOutcome, MockSponsor};
pub use scenarios::{DemoAccounts, DemoScenario};
