use std::{fmt, str::FromStr};

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// On-chain transaction id: the delegation hash of the body and its origin.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(B256);

impl TxId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(B256::new(bytes))
    }

    pub fn as_b256(&self) -> B256 {
        self.0
    }
}

impl From<B256> for TxId {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl FromStr for TxId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        if raw.len() != 64 {
            return Err(ValidationError::InvalidLength {
                kind: "TxId",
                expected: 32,
                actual: raw.len() / 2,
            });
        }
        B256::from_str(raw)
            .map(Self)
            .map_err(|err| ValidationError::InvalidHex(err.to_string()))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({self})")
    }
}

/// Local handle for a transaction tracked by the manager. Never sent on-chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TrackingId([u8; 16]);

impl TrackingId {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl FromStr for TrackingId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|err| ValidationError::InvalidHex(err.to_string()))?;
        let bytes: [u8; 16] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| ValidationError::InvalidLength {
                    kind: "TrackingId",
                    expected: 16,
                    actual: bytes.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for TrackingId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TrackingId> for String {
    fn from(value: TrackingId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackingId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::{TrackingId, TxId};
    use crate::error::ValidationError;

    #[test]
    fn tx_id_parses_prefixed_and_bare_hex() {
        let prefixed: TxId = format!("0x{}", "ab".repeat(32)).parse().unwrap();
        let bare: TxId = "ab".repeat(32).parse().unwrap();
        assert_eq!(prefixed, bare);
        assert_eq!(prefixed.to_string(), format!("0x{}", "ab".repeat(32)));
        assert!("0xabcd".parse::<TxId>().is_err());
    }

    #[test]
    fn tracking_id_is_opaque_hex_string() {
        let id = TrackingId::new([7; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(16)));
        assert_eq!(serde_json::from_str::<TrackingId>(&json).unwrap(), id);
        assert_eq!(
            "0102".parse::<TrackingId>(),
            Err(ValidationError::InvalidLength {
                kind: "TrackingId",
                expected: 16,
                actual: 2,
            })
        );
    }
}
