#![allow(dead_code)]

use chainrisk::adapters::file_config_adapter::FileConfigAdapter;
use chainrisk::domain::as_of::AsOf;
use chainrisk::domain::error::ChainRiskError;
use chainrisk::domain::market::Token;
use chainrisk::domain::plan::{BLOCK_SERIES_SLUG, TOKEN_PRICE_SLUG};
use chainrisk::domain::portfolio::Position;
use chainrisk::domain::span::Span;
use chainrisk::ports::chain_port::ChainPort;
use serde_json::{Value, json};
use std::cell::Cell;
use std::collections::HashMap;
use std::path::Path;

pub const DAY: i64 = 86_400;
pub const AS_OF: &str = "2022-03-01T23:59:59Z";
pub const AS_OF_TIMESTAMP: i64 = 1_646_179_199;

/// One block per day, numbered by days since the epoch. Prices are given
/// most recent first, one per day going back from the as-of block.
pub struct MockChainPort {
    end_block: u64,
    prices: HashMap<String, Vec<f64>>,
    pub point_calls: Cell<usize>,
    pub window_calls: Cell<usize>,
    pub block_calls: Cell<usize>,
}

impl MockChainPort {
    pub fn new() -> Self {
        Self {
            end_block: (AS_OF_TIMESTAMP / DAY) as u64,
            prices: HashMap::new(),
            point_calls: Cell::new(0),
            window_calls: Cell::new(0),
            block_calls: Cell::new(0),
        }
    }

    pub fn with_prices(mut self, address: &str, recent_first: &[f64]) -> Self {
        self.prices
            .insert(address.to_string(), recent_first.to_vec());
        self
    }

    pub fn external_calls(&self) -> usize {
        self.point_calls.get() + self.window_calls.get()
    }
}

impl ChainPort for MockChainPort {
    fn run_named_computation(
        &self,
        slug: &str,
        params: &Value,
        block_number: Option<u64>,
    ) -> Result<Value, ChainRiskError> {
        self.point_calls.set(self.point_calls.get() + 1);
        if slug != TOKEN_PRICE_SLUG {
            return Err(ChainRiskError::Computation {
                reason: format!("mock has no {slug}"),
            });
        }
        let address = params
            .pointer("/input/address")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let days_back = self.end_block.saturating_sub(block_number.unwrap_or_default()) as usize;
        match self.prices.get(address).and_then(|p| p.get(days_back)) {
            Some(price) => Ok(json!({ "price": price, "src": "mock" })),
            None => Ok(json!({ "src": "mock" })),
        }
    }

    fn run_named_computation_over_window(
        &self,
        slug: &str,
        _params: &Value,
        window: Span,
        interval: Span,
        end_timestamp: i64,
    ) -> Result<Value, ChainRiskError> {
        self.window_calls.set(self.window_calls.get() + 1);
        assert_eq!(slug, BLOCK_SERIES_SLUG);
        let samples = (window.seconds() / interval.seconds()).max(1);
        let series: Vec<Value> = (0..samples)
            .rev()
            .map(|i| {
                let ts = end_timestamp - i * interval.seconds();
                json!({
                    "blockNumber": ts / DAY,
                    "blockTimestamp": ts - ts % DAY,
                    "sampleTimestamp": ts,
                })
            })
            .collect();
        Ok(json!({ "series": series }))
    }

    fn block_number_for_timestamp(&self, timestamp: i64) -> Result<u64, ChainRiskError> {
        self.block_calls.set(self.block_calls.get() + 1);
        Ok((timestamp / DAY) as u64)
    }
}

pub fn as_of() -> AsOf {
    AsOf::parse(AS_OF).unwrap()
}

pub fn positions(holdings: &[(&str, f64)]) -> Vec<Position> {
    holdings
        .iter()
        .map(|(address, amount)| Position::new(Token::from_address(*address), *amount))
        .collect()
}

/// Config with a JSON cache at `cache_path` and a short VaR window.
pub fn json_cache_config(cache_path: &Path, extra: &str) -> FileConfigAdapter {
    let ini = format!(
        "[cache]\nenabled = true\nbackend = json\npath = {}\n{extra}\n[var]\nwindow = 4 days\ninterval = 1 day\nrolling_interval = 1\nconfidence = 0.9\n",
        cache_path.display()
    );
    FileConfigAdapter::from_string(&ini).unwrap()
}
