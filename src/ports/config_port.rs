//! Configuration access port trait.
//!
//! Sections used by a valuation run: `[cache]`, `[chain]`, `[portfolio]`
//! and `[var]`.

use crate::domain::error::ChainRiskError;
use crate::domain::span::Span;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// A value that must be present and non-blank.
    fn require_string(&self, section: &str, key: &str) -> Result<String, ChainRiskError> {
        match self.get_string(section, key) {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(ChainRiskError::ConfigMissing {
                section: section.to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// A duration such as `90 days`; `None` when the key is absent.
    fn get_span(&self, section: &str, key: &str) -> Result<Option<Span>, ChainRiskError> {
        self.get_string(section, key)
            .map(|value| value.parse())
            .transpose()
    }
}
