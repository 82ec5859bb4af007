//! Market-data plans: resolve the blocks covering a time window, then price
//! a target at each of them through the computation cache.
//!
//! [`BlockResolutionPlan`] turns an as-of time plus window/interval into a
//! descending list of block numbers. [`EndOfDayPlan`] runs it, fetches one
//! price per resolved block, and extracts either the latest price (`eod`) or
//! the historical return multipliers (`eod_var_scenario`).

use crate::domain::as_of::AsOf;
use crate::domain::cache::{CacheValue, ComputationCache};
use crate::domain::error::ChainRiskError;
use crate::domain::market::{Artifact, Extracted, MarketTarget, PlanResult};
use crate::domain::recipe::{Method, MethodKind, Recipe};
use crate::domain::span::Span;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const BLOCK_SERIES_SLUG: &str = "finance.get-one";
pub const TOKEN_PRICE_SLUG: &str = "token.price-ext";
const BLOCK_TARGET_KEY: &str = "HistoricalBlock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Eod,
    EodVarScenario,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Eod => "eod",
            Tag::EodVarScenario => "eod_var_scenario",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = ChainRiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eod" => Ok(Tag::Eod),
            "eod_var_scenario" => Ok(Tag::EodVarScenario),
            other => Err(ChainRiskError::UnknownTag {
                tag: other.to_string(),
            }),
        }
    }
}

/// Time parameters for one market build. `eod` only reads `as_of`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanParams {
    pub as_of: AsOf,
    pub window: Option<Span>,
    pub interval: Option<Span>,
    pub rolling_interval: Option<usize>,
}

impl PlanParams {
    pub fn eod(as_of: AsOf) -> Self {
        PlanParams {
            as_of,
            window: None,
            interval: None,
            rolling_interval: None,
        }
    }

    pub fn scenario(as_of: AsOf, window: Span, interval: Span, rolling_interval: usize) -> Self {
        PlanParams {
            as_of,
            window: Some(window),
            interval: Some(interval),
            rolling_interval: Some(rolling_interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRow {
    pub block_number: u64,
    pub block_timestamp: i64,
    pub block_time: DateTime<Utc>,
    pub sample_timestamp: i64,
    pub sample_time: DateTime<Utc>,
}

/// Blocks covering a window, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockResolution {
    pub block_numbers: Vec<u64>,
    pub table: Vec<BlockRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DishRow {
    pub block: BlockRow,
    pub columns: BTreeMap<String, Value>,
}

/// Working table of resolved blocks with per-block result columns merged in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dish {
    rows: Vec<DishRow>,
}

impl Dish {
    pub fn from_resolution(resolution: &BlockResolution) -> Self {
        Dish {
            rows: resolution
                .table
                .iter()
                .map(|block| DishRow {
                    block: block.clone(),
                    columns: BTreeMap::new(),
                })
                .collect(),
        }
    }

    pub fn rows(&self) -> &[DishRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Adds every field as a `<prefix>.<field>` column on the rows for
    /// `block_number`.
    pub fn merge_fields(&mut self, block_number: u64, prefix: &str, fields: &Map<String, Value>) {
        for row in self
            .rows
            .iter_mut()
            .filter(|r| r.block.block_number == block_number)
        {
            for (field, value) in fields {
                row.columns
                    .insert(format!("{prefix}.{field}"), value.clone());
            }
        }
    }

    /// The column as numbers in row order. Every row must carry a number.
    pub fn numeric_column(&self, column: &str) -> Result<Vec<f64>, ChainRiskError> {
        self.rows
            .iter()
            .map(|row| {
                row.columns
                    .get(column)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| ChainRiskError::MissingField {
                        column: column.to_string(),
                        block_number: row.block.block_number,
                    })
            })
            .collect()
    }
}

/// Something that can be run through the computation cache.
pub trait Plan {
    type Output;

    fn execute(&self, cache: &mut ComputationCache<'_>) -> Result<Self::Output, ChainRiskError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockResolutionPlan {
    pub tag: Tag,
    pub as_of: AsOf,
    pub window: Span,
    pub interval: Span,
}

impl BlockResolutionPlan {
    pub fn new(tag: Tag, as_of: AsOf, window: Span, interval: Span) -> Self {
        BlockResolutionPlan {
            tag,
            as_of,
            window,
            interval,
        }
    }

    /// Keyed only by window, interval and as-of time, so every target in
    /// every run shares one resolution per time grid.
    pub fn recipe_key(&self, as_of_timestamp: i64) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            MethodKind::HistoricalSeries,
            BLOCK_SERIES_SLUG,
            self.window,
            self.interval,
            as_of_timestamp
        )
    }
}

impl Plan for BlockResolutionPlan {
    type Output = BlockResolution;

    fn execute(&self, cache: &mut ComputationCache<'_>) -> Result<BlockResolution, ChainRiskError> {
        let as_of_timestamp = self.as_of.timestamp_for(self.tag)?;
        let as_of_block = cache.chain().block_number_for_timestamp(as_of_timestamp)?;
        debug!("as_of {} resolves to block {as_of_block}", self.as_of);

        let recipe = Recipe::new(
            self.recipe_key(as_of_timestamp),
            BLOCK_TARGET_KEY,
            Method::HistoricalSeries {
                slug: BLOCK_SERIES_SLUG.to_string(),
                params: json!({}),
                window: self.window,
                interval: self.interval,
                end_timestamp: as_of_timestamp,
            },
        )
        .with_post_process(resolve_block_series);

        cache.execute(&recipe)?.into_block_resolution()
    }
}

/// Post-process for a block series: rows sorted by block number descending,
/// with UTC times derived from the block and sample timestamps.
pub fn resolve_block_series(value: Value) -> Result<CacheValue, ChainRiskError> {
    let series = value
        .get("series")
        .and_then(Value::as_array)
        .ok_or_else(|| unexpected("block series result has no 'series' array"))?;

    let mut table = series
        .iter()
        .map(block_row)
        .collect::<Result<Vec<_>, _>>()?;
    table.sort_by(|a, b| b.block_number.cmp(&a.block_number));

    Ok(CacheValue::BlockResolution(BlockResolution {
        block_numbers: table.iter().map(|r| r.block_number).collect(),
        table,
    }))
}

fn block_row(item: &Value) -> Result<BlockRow, ChainRiskError> {
    let block_number = item
        .get("blockNumber")
        .and_then(Value::as_u64)
        .ok_or_else(|| unexpected("series item has no 'blockNumber'"))?;
    let block_timestamp = item
        .get("blockTimestamp")
        .and_then(Value::as_i64)
        .ok_or_else(|| unexpected("series item has no 'blockTimestamp'"))?;
    let sample_timestamp = item
        .get("sampleTimestamp")
        .and_then(Value::as_i64)
        .ok_or_else(|| unexpected("series item has no 'sampleTimestamp'"))?;

    Ok(BlockRow {
        block_number,
        block_timestamp,
        block_time: utc(block_timestamp)?,
        sample_timestamp,
        sample_time: utc(sample_timestamp)?,
    })
}

fn utc(timestamp: i64) -> Result<DateTime<Utc>, ChainRiskError> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| unexpected(&format!("timestamp {timestamp} out of range")))
}

fn unexpected(reason: &str) -> ChainRiskError {
    ChainRiskError::UnexpectedResult {
        reason: reason.to_string(),
    }
}

/// Ratios of each value to the one `rolling_interval` steps later in the
/// series. With the series ordered most recent first, these are historical
/// returns over `rolling_interval` sampling steps.
pub fn return_multipliers(series: &[f64], rolling_interval: usize) -> Vec<f64> {
    if rolling_interval >= series.len() {
        return Vec::new();
    }
    let leading = &series[..series.len() - rolling_interval];
    let lagging = &series[rolling_interval..];
    leading
        .iter()
        .zip(lagging)
        .map(|(lead, lag)| lead / lag)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndOfDayPlan {
    pub tag: Tag,
    pub target: MarketTarget,
    pub params: PlanParams,
}

impl EndOfDayPlan {
    pub fn new(tag: Tag, target: MarketTarget, params: PlanParams) -> Self {
        EndOfDayPlan {
            tag,
            target,
            params,
        }
    }

    fn window_and_interval(&self) -> Result<(Span, Span), ChainRiskError> {
        match self.tag {
            Tag::Eod => Ok((Span::days(1), Span::days(1))),
            Tag::EodVarScenario => {
                let missing = |name: &str| ChainRiskError::MissingPlanParameter {
                    tag: self.tag.to_string(),
                    name: name.to_string(),
                };
                let window = self.params.window.ok_or_else(|| missing("window"))?;
                let interval = self.params.interval.ok_or_else(|| missing("interval"))?;
                Ok((window, interval))
            }
        }
    }

    fn price_recipe(&self, block_number: u64) -> Result<Recipe, ChainRiskError> {
        let Artifact::Token(token) = &self.target.artifact else {
            return Err(ChainRiskError::UnsupportedArtifact {
                artifact: self.target.artifact.to_string(),
            });
        };
        Ok(Recipe::new(
            format!(
                "{}.{}.{}",
                self.target.key,
                MethodKind::PointInTime,
                block_number
            ),
            self.target.key.clone(),
            Method::PointInTime {
                slug: TOKEN_PRICE_SLUG.to_string(),
                params: json!({ "input": token }),
                block_number: Some(block_number),
            },
        ))
    }

    fn rolling_interval(&self) -> Result<usize, ChainRiskError> {
        self.params
            .rolling_interval
            .filter(|r| *r > 0)
            .ok_or(ChainRiskError::UndefinedRollingInterval)
    }
}

impl Plan for EndOfDayPlan {
    type Output = PlanResult;

    fn execute(&self, cache: &mut ComputationCache<'_>) -> Result<PlanResult, ChainRiskError> {
        let (window, interval) = self.window_and_interval()?;
        if self.tag == Tag::EodVarScenario {
            self.rolling_interval()?;
        }

        let resolution =
            BlockResolutionPlan::new(self.tag, self.params.as_of, window, interval).execute(cache)?;

        let mut dish = Dish::from_resolution(&resolution);
        for &block_number in &resolution.block_numbers {
            let recipe = self.price_recipe(block_number)?;
            let result = cache.execute(&recipe)?.into_raw()?;
            let fields = result.as_object().ok_or_else(|| {
                unexpected(&format!(
                    "price result for {} at block {block_number} is not an object",
                    self.target.key
                ))
            })?;
            dish.merge_fields(block_number, &recipe.target_key, fields);
        }

        let price_column = format!("{}.price", self.target.key);
        let extracted = match self.tag {
            Tag::Eod => {
                let prices = dish.numeric_column(&price_column)?;
                let latest = prices.first().copied().ok_or_else(|| {
                    unexpected(&format!("no blocks resolved for {}", self.target.key))
                })?;
                Extracted::Price(latest)
            }
            Tag::EodVarScenario => {
                let prices = dish.numeric_column(&price_column)?;
                Extracted::Multipliers(return_multipliers(&prices, self.rolling_interval()?))
            }
        };

        Ok(PlanResult {
            raw: dish,
            extracted,
        })
    }
}
