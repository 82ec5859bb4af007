//! Cacheable units of external computation.

use crate::domain::cache::CacheValue;
use crate::domain::error::ChainRiskError;
use crate::domain::span::Span;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Transform applied to a fresh external result before it is cached.
///
/// It runs once per cache miss and never on a hit, so it must be pure.
pub type PostProcess = fn(Value) -> Result<CacheValue, ChainRiskError>;

/// Post-process that stores the external result unchanged.
pub fn identity(value: Value) -> Result<CacheValue, ChainRiskError> {
    Ok(CacheValue::Raw(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MethodKind {
    PointInTime,
    HistoricalSeries,
}

impl MethodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::PointInTime => "run_model",
            MethodKind::HistoricalSeries => "run_model_historical",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodKind {
    type Err = ChainRiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run_model" => Ok(MethodKind::PointInTime),
            "run_model_historical" => Ok(MethodKind::HistoricalSeries),
            other => Err(ChainRiskError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// How a recipe reaches the external computation, with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    /// One named computation evaluated at a single block.
    PointInTime {
        slug: String,
        params: Value,
        block_number: Option<u64>,
    },
    /// One named computation sampled every `interval` over `window`,
    /// ending at `end_timestamp`.
    HistoricalSeries {
        slug: String,
        params: Value,
        window: Span,
        interval: Span,
        end_timestamp: i64,
    },
}

impl Method {
    pub fn kind(&self) -> MethodKind {
        match self {
            Method::PointInTime { .. } => MethodKind::PointInTime,
            Method::HistoricalSeries { .. } => MethodKind::HistoricalSeries,
        }
    }

    pub fn slug(&self) -> &str {
        match self {
            Method::PointInTime { slug, .. } | Method::HistoricalSeries { slug, .. } => slug,
        }
    }
}

/// A fully specified unit of work for the computation cache.
///
/// Two recipes with the same `key` must always produce the same result;
/// the cache relies on it.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub key: String,
    pub target_key: String,
    pub method: Method,
    pub post_process: PostProcess,
}

impl Recipe {
    pub fn new(key: impl Into<String>, target_key: impl Into<String>, method: Method) -> Self {
        Recipe {
            key: key.into(),
            target_key: target_key.into(),
            method,
            post_process: identity,
        }
    }

    pub fn with_post_process(mut self, post_process: PostProcess) -> Self {
        self.post_process = post_process;
        self
    }
}
