//! Clause: one value transfer or contract call inside a multi-clause transaction.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};

use crate::{abi::IERC20, body::RawClause};

/// One low-level operation. Clauses in a transaction execute in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    to: Address,
    #[serde(with = "decimal_u256")]
    value: U256,
    data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    abi_hint: Option<serde_json::Value>,
}

impl Clause {
    pub fn new(to: Address, value: U256, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            value,
            data: data.into(),
            comment: None,
            abi_hint: None,
        }
    }

    pub fn transfer_vet(to: Address, amount: U256) -> Self {
        Self::new(to, amount, Bytes::new())
    }

    pub fn call(to: Address, calldata: impl Into<Bytes>) -> Self {
        Self::new(to, U256::ZERO, calldata)
    }

    pub fn erc20_transfer(token: Address, to: Address, amount: U256) -> Self {
        Self::call(token, IERC20::transferCall { to, amount }.abi_encode())
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_abi_hint(mut self, abi_hint: serde_json::Value) -> Self {
        self.abi_hint = Some(abi_hint);
        self
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn abi_hint(&self) -> Option<&serde_json::Value> {
        self.abi_hint.as_ref()
    }

    pub fn to_raw(&self) -> RawClause {
        RawClause {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
        }
    }
}

/// Serializes `U256` as a decimal string; accepts decimal or `0x` hex strings and JSON integers.
pub mod decimal_u256 {
    use std::str::FromStr;

    use alloy_primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Int(u64),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => U256::from_str(s.trim()).map_err(de::Error::custom),
            Repr::Int(n) => Ok(U256::from(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, U256};
    use alloy_sol_types::SolCall;

    use super::Clause;
    use crate::abi::IERC20;

    #[test]
    fn erc20_transfer_encodes_calldata() {
        let token = address!("0x0000000000000000000000000000456e65726779");
        let to = address!("0x00000000000000000000000000000000000000aa");
        let clause = Clause::erc20_transfer(token, to, U256::from(5u64));
        assert_eq!(clause.to(), token);
        assert_eq!(clause.value(), U256::ZERO);
        let decoded = IERC20::transferCall::abi_decode(clause.data()).unwrap();
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.amount, U256::from(5u64));
    }

    #[test]
    fn value_serializes_as_decimal_string() {
        let clause = Clause::transfer_vet(
            address!("0x00000000000000000000000000000000000000aa"),
            U256::from(1_000_000_000_000_000_000u128),
        )
        .with_comment("pay");
        let json = serde_json::to_value(&clause).unwrap();
        assert_eq!(json["value"], "1000000000000000000");
        assert_eq!(json["data"], "0x");
        assert_eq!(json["comment"], "pay");
        assert!(json.get("abiHint").is_none());

        let back: Clause = serde_json::from_value(json).unwrap();
        assert_eq!(back, clause);
    }

    #[test]
    fn value_accepts_hex_and_integers() {
        let hex: Clause = serde_json::from_str(
            r#"{"to":"0x00000000000000000000000000000000000000aa","value":"0x10","data":"0x"}"#,
        )
        .unwrap();
        assert_eq!(hex.value(), U256::from(16u64));
        let int: Clause = serde_json::from_str(
            r#"{"to":"0x00000000000000000000000000000000000000aa","value":7,"data":"0x"}"#,
        )
        .unwrap();
        assert_eq!(int.value(), U256::from(7u64));
    }
}
