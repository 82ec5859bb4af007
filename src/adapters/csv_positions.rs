//! Positions file loader (`address,symbol,amount`).

use crate::domain::error::ChainRiskError;
use crate::domain::market::Token;
use crate::domain::portfolio::Position;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PositionRecord {
    address: Option<String>,
    symbol: Option<String>,
    amount: f64,
}

pub fn load_positions(path: impl AsRef<Path>) -> Result<Vec<Position>, ChainRiskError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ChainRiskError::InvalidPosition {
        position: path.display().to_string(),
        reason: format!("failed to read positions: {e}"),
    })?;
    read_positions(file)
}

pub fn read_positions(reader: impl Read) -> Result<Vec<Position>, ChainRiskError> {
    csv::Reader::from_reader(reader)
        .deserialize::<PositionRecord>()
        .enumerate()
        .map(|(n, record)| {
            let record: PositionRecord = record.map_err(|e| ChainRiskError::InvalidPosition {
                position: format!("#{n}"),
                reason: format!("CSV parse error: {e}"),
            })?;
            Ok(Position::new(
                Token {
                    address: record.address,
                    symbol: record.symbol,
                },
                record.amount,
            ))
        })
        .collect()
}
