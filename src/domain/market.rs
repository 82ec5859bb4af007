//! Market data requirements and resolved market snapshots.

use crate::domain::error::ChainRiskError;
use crate::domain::plan::Dish;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// An on-chain token reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub address: Option<String>,
    pub symbol: Option<String>,
}

impl Token {
    pub fn from_address(address: impl Into<String>) -> Self {
        Token {
            address: Some(address.into()),
            symbol: None,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// The address, if one is set and non-blank.
    pub fn address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// The instrument a market target stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Artifact {
    Token(Token),
    Contract { address: String },
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Token(token) => match (&token.symbol, token.address()) {
                (Some(symbol), Some(address)) => write!(f, "Token({symbol} {address})"),
                (None, Some(address)) => write!(f, "Token({address})"),
                (Some(symbol), None) => write!(f, "Token({symbol})"),
                (None, None) => write!(f, "Token(?)"),
            },
            Artifact::Contract { address } => write!(f, "Contract({address})"),
        }
    }
}

/// One instrument's market-data requirement.
///
/// `key` identifies the requirement within a market; callers are responsible
/// for only ever pairing a key with one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketTarget {
    pub key: String,
    pub artifact: Artifact,
}

impl MarketTarget {
    pub fn new(key: impl Into<String>, artifact: Artifact) -> Self {
        MarketTarget {
            key: key.into(),
            artifact,
        }
    }
}

/// The value a plan pulls out of its working table.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// Price at the most recent resolved block.
    Price(f64),
    /// Historical return multipliers, most recent first.
    Multipliers(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanResult {
    pub raw: Dish,
    pub extracted: Extracted,
}

/// Resolved market data for one valuation run, keyed by target key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Market {
    slices: HashMap<String, PlanResult>,
}

impl Market {
    pub fn get(&self, key: &str) -> Result<&PlanResult, ChainRiskError> {
        self.slices
            .get(key)
            .ok_or_else(|| ChainRiskError::MissingMarketData {
                key: key.to_string(),
            })
    }

    pub fn price(&self, key: &str) -> Result<f64, ChainRiskError> {
        match &self.get(key)?.extracted {
            Extracted::Price(price) => Ok(*price),
            Extracted::Multipliers(_) => Err(ChainRiskError::UnexpectedResult {
                reason: format!("market entry {key} holds scenarios, not a price"),
            }),
        }
    }

    pub fn multipliers(&self, key: &str) -> Result<&[f64], ChainRiskError> {
        match &self.get(key)?.extracted {
            Extracted::Multipliers(values) => Ok(values),
            Extracted::Price(_) => Err(ChainRiskError::UnexpectedResult {
                reason: format!("market entry {key} holds a price, not scenarios"),
            }),
        }
    }

    /// Number of scenarios carried by this market: the longest multiplier
    /// series among its entries, or zero for a price-only market.
    pub fn scenario_count(&self) -> usize {
        self.slices
            .values()
            .filter_map(|r| match &r.extracted {
                Extracted::Multipliers(values) => Some(values.len()),
                Extracted::Price(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

impl FromIterator<(String, PlanResult)> for Market {
    fn from_iter<I: IntoIterator<Item = (String, PlanResult)>>(iter: I) -> Self {
        Market {
            slices: iter.into_iter().collect(),
        }
    }
}
