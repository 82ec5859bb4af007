//! Valuation points in time.

use crate::domain::error::ChainRiskError;
use crate::domain::plan::Tag;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// The point in time a valuation or market build refers to.
///
/// `Naive` exists so that timestamps without zone information can be carried
/// up to the point where they are rejected, instead of silently assuming UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsOf {
    Instant(DateTime<FixedOffset>),
    Date(NaiveDate),
    Naive(NaiveDateTime),
}

impl AsOf {
    pub fn parse(input: &str) -> Result<Self, ChainRiskError> {
        let input = input.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Ok(AsOf::Instant(dt));
        }
        if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            return Ok(AsOf::Date(date));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
                return Ok(AsOf::Naive(naive));
            }
        }
        Err(ChainRiskError::UnsupportedAsOf {
            as_of: input.to_string(),
        })
    }

    pub fn is_timezone_aware(&self) -> bool {
        matches!(self, AsOf::Instant(_))
    }

    pub fn as_instant(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            AsOf::Instant(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Unix timestamp used to resolve blocks for a plan with the given tag.
    ///
    /// A bare date is only meaningful for end-of-day valuation, where it
    /// stands for the last second of that day in UTC.
    pub fn timestamp_for(&self, tag: Tag) -> Result<i64, ChainRiskError> {
        match (self, tag) {
            (AsOf::Instant(dt), _) => Ok(dt.timestamp()),
            (AsOf::Date(date), Tag::Eod) => date
                .and_hms_opt(23, 59, 59)
                .map(|dt| dt.and_utc().timestamp())
                .ok_or_else(|| self.unsupported()),
            _ => Err(self.unsupported()),
        }
    }

    /// Pins a bare date to the last second of that day in UTC. Other forms
    /// are returned unchanged.
    pub fn at_end_of_day(self) -> AsOf {
        match self {
            AsOf::Date(date) => date
                .and_hms_opt(23, 59, 59)
                .map(|dt| AsOf::from(dt.and_utc()))
                .unwrap_or(self),
            other => other,
        }
    }

    fn unsupported(&self) -> ChainRiskError {
        ChainRiskError::UnsupportedAsOf {
            as_of: self.to_string(),
        }
    }
}

impl fmt::Display for AsOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsOf::Instant(dt) => write!(f, "{}", dt.to_rfc3339()),
            AsOf::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            AsOf::Naive(naive) => write!(f, "{}", naive.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

impl FromStr for AsOf {
    type Err = ChainRiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AsOf::parse(s)
    }
}

impl From<DateTime<FixedOffset>> for AsOf {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        AsOf::Instant(dt)
    }
}

impl From<DateTime<Utc>> for AsOf {
    fn from(dt: DateTime<Utc>) -> Self {
        AsOf::Instant(dt.fixed_offset())
    }
}

impl From<NaiveDate> for AsOf {
    fn from(date: NaiveDate) -> Self {
        AsOf::Date(date)
    }
}

impl From<NaiveDateTime> for AsOf {
    fn from(naive: NaiveDateTime) -> Self {
        AsOf::Naive(naive)
    }
}
