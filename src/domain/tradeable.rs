//! Positions that can be valued against a market.

use crate::domain::as_of::AsOf;
use crate::domain::error::ChainRiskError;
use crate::domain::market::{Artifact, Market, MarketTarget, Token};
use serde_json::Value;
use std::iter;

/// Capability shared by every position kind.
pub trait Tradeable {
    fn tid(&self) -> &str;

    /// Free-form provenance attached at construction.
    fn traces(&self) -> &[Value];

    /// Market targets this position needs. Each call starts a fresh pass.
    fn requires(&self) -> Box<dyn Iterator<Item = MarketTarget> + '_>;

    /// Profit or loss at `new_as_of`, with `adjust` applied to the looked-up
    /// market value first.
    fn value(
        &self,
        new_as_of: &AsOf,
        market: &Market,
        adjust: &dyn Fn(f64) -> f64,
    ) -> Result<f64, ChainRiskError>;

    /// Change in value under each scenario multiplier, in scenario order.
    fn value_scenarios(
        &self,
        new_as_of: &AsOf,
        market: &Market,
        market_scenarios: &Market,
    ) -> Result<Vec<f64>, ChainRiskError>;
}

/// Leaves a market value unchanged.
pub fn unadjusted(x: f64) -> f64 {
    x
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenTradeable {
    tid: String,
    traces: Vec<Value>,
    as_of: AsOf,
    token: Token,
    quantity: f64,
    entry_price: f64,
    key: String,
}

impl TokenTradeable {
    pub fn new(
        tid: impl Into<String>,
        traces: Vec<Value>,
        as_of: AsOf,
        token: Token,
        quantity: f64,
        entry_price: f64,
    ) -> Result<Self, ChainRiskError> {
        let tid = tid.into();
        if !as_of.is_timezone_aware() {
            return Err(ChainRiskError::UnsupportedAsOf {
                as_of: as_of.to_string(),
            });
        }
        let key = match token.address() {
            Some(address) => format!("Token.{address}"),
            None => {
                return Err(ChainRiskError::InvalidPosition {
                    position: tid,
                    reason: "token has no address".to_string(),
                });
            }
        };
        Ok(TokenTradeable {
            tid,
            traces,
            as_of,
            token,
            quantity,
            entry_price,
            key,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn as_of(&self) -> &AsOf {
        &self.as_of
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }
}

impl Tradeable for TokenTradeable {
    fn tid(&self) -> &str {
        &self.tid
    }

    fn traces(&self) -> &[Value] {
        &self.traces
    }

    fn requires(&self) -> Box<dyn Iterator<Item = MarketTarget> + '_> {
        Box::new(iter::once_with(move || {
            MarketTarget::new(self.key.clone(), Artifact::Token(self.token.clone()))
        }))
    }

    // Marked at lookup time: `new_as_of` does not move the valuation.
    fn value(
        &self,
        _new_as_of: &AsOf,
        market: &Market,
        adjust: &dyn Fn(f64) -> f64,
    ) -> Result<f64, ChainRiskError> {
        let price = adjust(market.price(&self.key)?);
        Ok((price - self.entry_price) * self.quantity)
    }

    fn value_scenarios(
        &self,
        new_as_of: &AsOf,
        market: &Market,
        market_scenarios: &Market,
    ) -> Result<Vec<f64>, ChainRiskError> {
        let base = self.value(new_as_of, market, &unadjusted)?;
        market_scenarios
            .multipliers(&self.key)?
            .iter()
            .map(|&multiplier| {
                let shocked = self.value(new_as_of, market, &|x: f64| x * multiplier)?;
                Ok(shocked - base)
            })
            .collect()
    }
}

/// Placeholder for contract positions, which are not priced yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractTradeable {
    tid: String,
    traces: Vec<Value>,
    address: String,
}

impl ContractTradeable {
    pub fn new(tid: impl Into<String>, traces: Vec<Value>, address: impl Into<String>) -> Self {
        ContractTradeable {
            tid: tid.into(),
            traces,
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Tradeable for ContractTradeable {
    fn tid(&self) -> &str {
        &self.tid
    }

    fn traces(&self) -> &[Value] {
        &self.traces
    }

    fn requires(&self) -> Box<dyn Iterator<Item = MarketTarget> + '_> {
        Box::new(iter::empty())
    }

    fn value(
        &self,
        _new_as_of: &AsOf,
        _market: &Market,
        _adjust: &dyn Fn(f64) -> f64,
    ) -> Result<f64, ChainRiskError> {
        Ok(0.0)
    }

    fn value_scenarios(
        &self,
        _new_as_of: &AsOf,
        _market: &Market,
        market_scenarios: &Market,
    ) -> Result<Vec<f64>, ChainRiskError> {
        Ok(vec![0.0; market_scenarios.scenario_count()])
    }
}

/// Every position kind a portfolio can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Trade {
    Token(TokenTradeable),
    Contract(ContractTradeable),
}

impl Trade {
    fn inner(&self) -> &dyn Tradeable {
        match self {
            Trade::Token(t) => t,
            Trade::Contract(c) => c,
        }
    }
}

impl Tradeable for Trade {
    fn tid(&self) -> &str {
        self.inner().tid()
    }

    fn traces(&self) -> &[Value] {
        self.inner().traces()
    }

    fn requires(&self) -> Box<dyn Iterator<Item = MarketTarget> + '_> {
        self.inner().requires()
    }

    fn value(
        &self,
        new_as_of: &AsOf,
        market: &Market,
        adjust: &dyn Fn(f64) -> f64,
    ) -> Result<f64, ChainRiskError> {
        self.inner().value(new_as_of, market, adjust)
    }

    fn value_scenarios(
        &self,
        new_as_of: &AsOf,
        market: &Market,
        market_scenarios: &Market,
    ) -> Result<Vec<f64>, ChainRiskError> {
        self.inner()
            .value_scenarios(new_as_of, market, market_scenarios)
    }
}

impl From<TokenTradeable> for Trade {
    fn from(t: TokenTradeable) -> Self {
        Trade::Token(t)
    }
}

impl From<ContractTradeable> for Trade {
    fn from(c: ContractTradeable) -> Self {
        Trade::Contract(c)
    }
}
