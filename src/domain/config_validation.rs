//! Configuration validation.
//!
//! Validates config fields before a valuation run touches the chain or the
//! cache store.

use crate::domain::as_of::AsOf;
use crate::domain::error::ChainRiskError;
use crate::domain::span::Span;
use crate::ports::config_port::ConfigPort;

pub fn validate_cache_config(config: &dyn ConfigPort) -> Result<(), ChainRiskError> {
    if !config.get_bool("cache", "enabled", true) {
        return Ok(());
    }
    validate_backend(config)?;
    config.require_string("cache", "path")?;
    Ok(())
}

pub fn validate_portfolio_config(config: &dyn ConfigPort) -> Result<(), ChainRiskError> {
    config.require_string("chain", "blocks_csv")?;
    config.require_string("chain", "prices_csv")?;
    config.require_string("portfolio", "positions_csv")?;
    if let Some(value) = config.get_string("portfolio", "as_of") {
        AsOf::parse(&value).map_err(|e| invalid("portfolio", "as_of", e))?;
    }
    Ok(())
}

pub fn validate_var_config(config: &dyn ConfigPort) -> Result<(), ChainRiskError> {
    let window = span(config, "window")?;
    let interval = span(config, "interval")?;
    if let (Some(window), Some(interval)) = (window, interval) {
        if interval.seconds() > window.seconds() {
            return Err(ChainRiskError::ConfigInvalid {
                section: "var".to_string(),
                key: "interval".to_string(),
                reason: "interval must not exceed window".to_string(),
            });
        }
    }
    validate_rolling_interval(config)?;
    validate_confidence(config)?;
    Ok(())
}

fn validate_backend(config: &dyn ConfigPort) -> Result<(), ChainRiskError> {
    let backend = config
        .get_string("cache", "backend")
        .unwrap_or_else(|| "json".to_string());
    match backend.trim() {
        "json" => Ok(()),
        "sqlite" if cfg!(feature = "sqlite") => Ok(()),
        "sqlite" => Err(ChainRiskError::ConfigInvalid {
            section: "cache".to_string(),
            key: "backend".to_string(),
            reason: "sqlite backend requires the sqlite feature".to_string(),
        }),
        other => Err(ChainRiskError::ConfigInvalid {
            section: "cache".to_string(),
            key: "backend".to_string(),
            reason: format!("unknown backend '{other}', expected json or sqlite"),
        }),
    }
}

fn span(config: &dyn ConfigPort, key: &str) -> Result<Option<Span>, ChainRiskError> {
    config.get_span("var", key).map_err(|e| invalid("var", key, e))
}

fn validate_rolling_interval(config: &dyn ConfigPort) -> Result<(), ChainRiskError> {
    let value = config.get_int("var", "rolling_interval", 1);
    if value < 1 {
        return Err(ChainRiskError::ConfigInvalid {
            section: "var".to_string(),
            key: "rolling_interval".to_string(),
            reason: "rolling_interval must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn validate_confidence(config: &dyn ConfigPort) -> Result<(), ChainRiskError> {
    check_confidence(config.get_double("var", "confidence", 0.99))
}

/// A VaR confidence level must lie strictly between 0 and 1, whether it
/// comes from `[var] confidence` or a command-line override.
pub fn check_confidence(value: f64) -> Result<(), ChainRiskError> {
    if !(value > 0.0 && value < 1.0) {
        return Err(ChainRiskError::ConfigInvalid {
            section: "var".to_string(),
            key: "confidence".to_string(),
            reason: "confidence must be between 0 and 1".to_string(),
        });
    }
    Ok(())
}

fn invalid(section: &str, key: &str, err: ChainRiskError) -> ChainRiskError {
    ChainRiskError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: err.to_string(),
    }
}
