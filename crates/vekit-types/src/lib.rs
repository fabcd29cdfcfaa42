pub mod abi;
pub mod body;
pub mod clause;
pub mod error;
pub mod ids;
pub mod token;
pub mod traits;

pub use alloy_primitives::{Address, Bytes, B256, U256};
pub use body::{
    blake2b256, signature_bytes, RawClause, SignedTransaction, TransactionBody, FEATURE_DELEGATED,
    SIG_LEN,
};
pub use clause::Clause;
pub use error::{CodecError, ErrorCategory, StoreError, ValidationError};
pub use ids::{TrackingId, TxId};
pub use token::GasToken;
pub use traits::{InMemoryKeyValueStore, KeyValueStore};
