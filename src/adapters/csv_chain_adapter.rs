//! Offline chain backed by CSV files.
//!
//! `blocks_csv` holds `block_number,timestamp`; `prices_csv` holds
//! `address,block_number,price`. Addresses are matched case-insensitively.

use crate::domain::error::ChainRiskError;
use crate::domain::plan::{BLOCK_SERIES_SLUG, TOKEN_PRICE_SLUG};
use crate::domain::span::Span;
use crate::ports::chain_port::ChainPort;
use crate::ports::config_port::ConfigPort;
use log::debug;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
struct BlockRecord {
    block_number: u64,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct PriceRecord {
    address: String,
    block_number: u64,
    price: f64,
}

pub struct CsvChainAdapter {
    blocks: Vec<BlockRecord>,
    prices: HashMap<String, BTreeMap<u64, f64>>,
}

fn computation(reason: String) -> ChainRiskError {
    ChainRiskError::Computation { reason }
}

fn open(path: &Path) -> Result<File, ChainRiskError> {
    File::open(path).map_err(|e| computation(format!("failed to read {}: {}", path.display(), e)))
}

impl CsvChainAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ChainRiskError> {
        Self::from_files(
            config.require_string("chain", "blocks_csv")?,
            config.require_string("chain", "prices_csv")?,
        )
    }

    pub fn from_files(
        blocks_csv: impl AsRef<Path>,
        prices_csv: impl AsRef<Path>,
    ) -> Result<Self, ChainRiskError> {
        Self::from_readers(open(blocks_csv.as_ref())?, open(prices_csv.as_ref())?)
    }

    pub fn from_readers(blocks: impl Read, prices: impl Read) -> Result<Self, ChainRiskError> {
        let mut block_rows = Vec::new();
        for record in csv::Reader::from_reader(blocks).deserialize::<BlockRecord>() {
            let record: BlockRecord =
                record.map_err(|e| computation(format!("blocks CSV parse error: {e}")))?;
            block_rows.push(record);
        }
        block_rows.sort_by_key(|b| (b.timestamp, b.block_number));

        let mut price_rows: HashMap<String, BTreeMap<u64, f64>> = HashMap::new();
        for record in csv::Reader::from_reader(prices).deserialize::<PriceRecord>() {
            let record: PriceRecord =
                record.map_err(|e| computation(format!("prices CSV parse error: {e}")))?;
            price_rows
                .entry(record.address.trim().to_lowercase())
                .or_default()
                .insert(record.block_number, record.price);
        }

        debug!(
            "loaded {} blocks and price history for {} addresses",
            block_rows.len(),
            price_rows.len()
        );
        Ok(Self {
            blocks: block_rows,
            prices: price_rows,
        })
    }

    fn block_at(&self, timestamp: i64) -> Result<BlockRecord, ChainRiskError> {
        let idx = self.blocks.partition_point(|b| b.timestamp <= timestamp);
        idx.checked_sub(1)
            .map(|i| self.blocks[i])
            .ok_or_else(|| computation(format!("no block at or before timestamp {timestamp}")))
    }

    fn price_at(&self, address: &str, block_number: u64) -> Option<f64> {
        self.prices
            .get(&address.trim().to_lowercase())
            .and_then(|history| history.range(..=block_number).next_back())
            .map(|(_, price)| *price)
    }
}

impl ChainPort for CsvChainAdapter {
    fn run_named_computation(
        &self,
        slug: &str,
        params: &Value,
        block_number: Option<u64>,
    ) -> Result<Value, ChainRiskError> {
        if slug != TOKEN_PRICE_SLUG {
            return Err(computation(format!("unsupported computation {slug}")));
        }
        let address = params
            .pointer("/input/address")
            .and_then(Value::as_str)
            .ok_or_else(|| computation(format!("{slug} requires input.address")))?;
        let block_number =
            block_number.ok_or_else(|| computation(format!("{slug} requires a block number")))?;

        match self.price_at(address, block_number) {
            Some(price) => Ok(json!({ "price": price, "src": "csv" })),
            None => {
                debug!("no price for {address} at or before block {block_number}");
                Ok(json!({ "src": "csv" }))
            }
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
        if slug != BLOCK_SERIES_SLUG {
            return Err(computation(format!("unsupported series computation {slug}")));
        }
        let samples = (window.seconds() / interval.seconds()).max(1);
        let series = (0..samples)
            .rev()
            .map(|i| {
                let sample_timestamp = end_timestamp - i * interval.seconds();
                let block = self.block_at(sample_timestamp)?;
                Ok(json!({
                    "blockNumber": block.block_number,
                    "blockTimestamp": block.timestamp,
                    "sampleTimestamp": sample_timestamp,
                    "output": { "blockNumber": block.block_number },
                }))
            })
            .collect::<Result<Vec<_>, ChainRiskError>>()?;
        Ok(json!({ "series": series }))
    }

    fn block_number_for_timestamp(&self, timestamp: i64) -> Result<u64, ChainRiskError> {
        self.block_at(timestamp).map(|b| b.block_number)
    }
}
