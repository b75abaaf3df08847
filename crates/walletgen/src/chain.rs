//! Supported blockchain networks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a symbol does not name one of the supported chains.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported chain '{0}'")]
pub struct UnsupportedChain(pub String);

/// One of the twelve chains wallets can be generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Eth,
    Btc,
    Sol,
    Base,
    Bsc,
    Polygon,
    Avaxc,
    Tron,
    Xrp,
    Doge,
    Ltc,
    Ton,
}

impl Chain {
    pub const ALL: [Chain; 12] = [
        Chain::Eth,
        Chain::Btc,
        Chain::Sol,
        Chain::Base,
        Chain::Bsc,
        Chain::Polygon,
        Chain::Avaxc,
        Chain::Tron,
        Chain::Xrp,
        Chain::Doge,
        Chain::Ltc,
        Chain::Ton,
    ];

    /// The upper-case ticker used in commands, file names and CSV rows.
    pub fn symbol(&self) -> &'static str {
        match self {
            Chain::Eth => "ETH",
            Chain::Btc => "BTC",
            Chain::Sol => "SOL",
            Chain::Base => "BASE",
            Chain::Bsc => "BSC",
            Chain::Polygon => "POLYGON",
            Chain::Avaxc => "AVAXC",
            Chain::Tron => "TRON",
            Chain::Xrp => "XRP",
            Chain::Doge => "DOGE",
            Chain::Ltc => "LTC",
            Chain::Ton => "TON",
        }
    }

    /// EVM chains share the Ethereum derivation path and address format.
    pub fn is_evm(&self) -> bool {
        matches!(
            self,
            Chain::Eth | Chain::Base | Chain::Bsc | Chain::Polygon | Chain::Avaxc
        )
    }

    /// Ed25519 chains derive through SLIP-10, everything else through BIP-32.
    pub fn is_ed25519(&self) -> bool {
        matches!(self, Chain::Sol | Chain::Ton)
    }

    /// Derivation path of the first account's first receiving address.
    pub fn derivation_path(&self) -> &'static str {
        match self {
            Chain::Eth | Chain::Base | Chain::Bsc | Chain::Polygon | Chain::Avaxc => {
                "m/44'/60'/0'/0/0"
            }
            Chain::Btc => "m/84'/0'/0'/0/0",
            Chain::Sol => "m/44'/501'/0'/0'",
            Chain::Tron => "m/44'/195'/0'/0/0",
            Chain::Xrp => "m/44'/144'/0'/0/0",
            Chain::Doge => "m/44'/3'/0'/0/0",
            Chain::Ltc => "m/84'/2'/0'/0/0",
            Chain::Ton => "m/44'/607'/0'",
        }
    }

    /// Comma separated list of all symbols, for usage messages.
    pub fn supported_list() -> String {
        Chain::ALL
            .iter()
            .map(|c| c.symbol())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Chain {
    type Err = UnsupportedChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Chain::ALL
            .iter()
            .copied()
            .find(|c| c.symbol() == wanted)
            .ok_or_else(|| UnsupportedChain(s.trim().to_string()))
    }
}
