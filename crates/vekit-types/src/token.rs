use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Tokens the fee sponsor accepts as payment for gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GasToken {
    Vet,
    Vtho,
    B3tr,
}

impl GasToken {
    pub const ALL: [GasToken; 3] = [GasToken::Vet, GasToken::Vtho, GasToken::B3tr];

    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Vet => "VET",
            Self::Vtho => "VTHO",
            Self::B3tr => "B3TR",
        }
    }

    pub const fn decimals(&self) -> u8 {
        18
    }

    /// VET moves as clause value; every other token is an ERC-20 style contract.
    pub const fn is_native(&self) -> bool {
        matches!(self, Self::Vet)
    }
}

impl fmt::Display for GasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for GasToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VET" => Ok(Self::Vet),
            "VTHO" => Ok(Self::Vtho),
            "B3TR" => Ok(Self::B3tr),
            _ => Err(ValidationError::UnknownToken(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GasToken;

    #[test]
    fn symbols_round_trip_case_insensitively() {
        for token in GasToken::ALL {
            assert_eq!(token.symbol().parse::<GasToken>().unwrap(), token);
            assert_eq!(
                token.symbol().to_lowercase().parse::<GasToken>().unwrap(),
                token
            );
        }
        assert!("DOGE".parse::<GasToken>().is_err());
    }

    #[test]
    fn serde_uses_symbols() {
        let json = serde_json::to_string(&vec![GasToken::Vtho, GasToken::B3tr]).unwrap();
        assert_eq!(json, r#"["VTHO","B3TR"]"#);
    }
}
