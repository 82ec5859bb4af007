//! Duration expressions such as `"1 day"` or `"90 days"`.

use crate::domain::error::ChainRiskError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpanUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl SpanUnit {
    pub fn seconds(self) -> i64 {
        match self {
            SpanUnit::Second => 1,
            SpanUnit::Minute => 60,
            SpanUnit::Hour => 3_600,
            SpanUnit::Day => 86_400,
            SpanUnit::Week => 604_800,
        }
    }

    fn name(self) -> &'static str {
        match self {
            SpanUnit::Second => "second",
            SpanUnit::Minute => "minute",
            SpanUnit::Hour => "hour",
            SpanUnit::Day => "day",
            SpanUnit::Week => "week",
        }
    }

    fn parse(word: &str) -> Option<Self> {
        let singular = word.strip_suffix('s').unwrap_or(word);
        match singular {
            "second" => Some(SpanUnit::Second),
            "minute" => Some(SpanUnit::Minute),
            "hour" => Some(SpanUnit::Hour),
            "day" => Some(SpanUnit::Day),
            "week" => Some(SpanUnit::Week),
            _ => None,
        }
    }
}

/// A positive count of a calendar-free time unit.
///
/// The `Display` form is canonical and is embedded in cache keys, so
/// `"1 days"` and `"1 day"` resolve to the same cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub count: u32,
    pub unit: SpanUnit,
}

impl Span {
    pub fn new(count: u32, unit: SpanUnit) -> Self {
        Span { count, unit }
    }

    pub fn days(count: u32) -> Self {
        Span::new(count, SpanUnit::Day)
    }

    pub fn seconds(&self) -> i64 {
        i64::from(self.count) * self.unit.seconds()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 1 {
            write!(f, "1 {}", self.unit.name())
        } else {
            write!(f, "{} {}s", self.count, self.unit.name())
        }
    }
}

impl FromStr for Span {
    type Err = ChainRiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ChainRiskError::InvalidSpan {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.split_whitespace();
        let (Some(count), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected '<count> <unit>'"));
        };

        let count: u32 = count
            .parse()
            .map_err(|_| invalid("count must be a non-negative integer"))?;
        if count == 0 {
            return Err(invalid("count must be positive"));
        }
        let unit = SpanUnit::parse(&unit.to_lowercase())
            .ok_or_else(|| invalid("unit must be one of second, minute, hour, day, week"))?;

        Ok(Span { count, unit })
    }
}
