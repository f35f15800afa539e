//! Shared data structures: chain primitives, project metadata and the live
//! sale snapshot.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::SaleError;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = SaleError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                let bytes =
                    hex::decode(trimmed).map_err(|_| SaleError::InvalidHex(s.to_string()))?;
                let array: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| SaleError::InvalidHex(s.to_string()))?;
                Ok(Self(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// A 20-byte account or contract address. Equality is byte-wise, so
    /// checksummed and lowercase spellings compare equal.
    Address,
    20
);

fixed_bytes!(
    /// A 32-byte hash (transaction hashes, merkle roots and proof nodes).
    H256,
    32
);

pub type TxHash = H256;

/// Serde helpers for `u128` amounts carried as decimal strings, since JSON
/// numbers lose precision past 2^53.
pub mod decimal_u128 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(n as u128),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Project metadata
// ─────────────────────────────────────────────────────────

/// Currency a project is priced in. `address` is `None` for the chain's
/// native currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    pub symbol: String,
    pub address: Option<Address>,
}

impl Default for Currency {
    fn default() -> Self {
        Self {
            symbol: "ETH".to_string(),
            address: None,
        }
    }
}

/// The minter currently assigned to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinterConfiguration {
    pub address: Address,
    /// Raw on-chain minter type, e.g. `MinterSetPriceV5`.
    pub minter_type: String,
    #[serde(default)]
    pub merkle_root: Option<H256>,
    /// Project ids whose tokens unlock holder-gated minting.
    #[serde(default)]
    pub allowlisted_projects: Vec<String>,
}

/// Static project metadata, fetched once per project id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Platform identifier, `<core contract>-<project index>`.
    pub id: String,
    /// The project's index on its core contract.
    pub project_index: u64,
    pub core_contract: Address,
    pub artist_address: Address,
    pub name: String,
    pub complete: bool,
    pub auction_start_time: Option<DateTime<Utc>>,
    pub auction_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub currency: Currency,
    pub minter: Option<MinterConfiguration>,
}

// ─────────────────────────────────────────────────────────
// Live sale data
// ─────────────────────────────────────────────────────────

/// Result of the minter's `getPriceInfo` read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceInfo {
    pub is_configured: bool,
    pub token_price_in_wei: u128,
}

/// Result of the core contract's `projectStateData` read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectState {
    pub invocations: u64,
    pub max_invocations: u64,
    pub active: bool,
    pub paused: bool,
    pub completed_timestamp: Option<u64>,
}

/// Complete snapshot of a project's dynamic sale state. Every poll produces
/// a whole new value; fields are never merged across polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSaleData {
    pub is_configured: bool,
    #[serde(with = "decimal_u128")]
    pub token_price_in_wei: u128,
    pub invocations: u64,
    pub max_invocations: u64,
    pub active: bool,
    pub paused: bool,
    pub completed_timestamp: Option<u64>,
}

impl LiveSaleData {
    pub fn from_reads(price: PriceInfo, state: ProjectState) -> Self {
        Self {
            is_configured: price.is_configured,
            token_price_in_wei: price.token_price_in_wei,
            invocations: state.invocations,
            max_invocations: state.max_invocations,
            active: state.active,
            paused: state.paused,
            completed_timestamp: state.completed_timestamp,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Tokens and transactions
// ─────────────────────────────────────────────────────────

/// A token held by an address, as reported by the metadata source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedToken {
    pub contract_address: Address,
    #[serde(with = "decimal_u128")]
    pub token_id: u128,
    pub owner: Address,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: Vec<u8>,
    pub value: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}
