//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::adapters::csv_chain_adapter::CsvChainAdapter;
use crate::adapters::csv_positions::load_positions;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_file_store::JsonFileStore;
use crate::domain::as_of::AsOf;
use crate::domain::cache::{CacheOptions, CacheStats, ComputationCache, count_by_method};
use crate::domain::config_validation::{
    check_confidence, validate_cache_config, validate_portfolio_config, validate_var_config,
};
use crate::domain::error::ChainRiskError;
use crate::domain::plan::{PlanParams, Tag};
use crate::domain::portfolio::{PortfolioManager, Position, ScenarioRow, ValueRow};
use crate::domain::recipe::MethodKind;
use crate::domain::span::Span;
use crate::domain::var::{VarResult, historical_var, portfolio_pnl_by_scenario};
use crate::ports::cache_store::CacheStore;
use crate::ports::chain_port::ChainPort;
use crate::ports::config_port::ConfigPort;

#[derive(Parser, Debug)]
#[command(name = "chainrisk", about = "On-chain portfolio valuation and historical VaR")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Value every position at end of day
    Value {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        as_of: Option<String>,
    },
    /// Compute historical scenario PnL and VaR
    Var {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        as_of: Option<String>,
        #[arg(long)]
        confidence: Option<f64>,
    },
    /// Show what the configured cache store holds
    CacheStats {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Value { config, as_of } => run_value(&config, as_of.as_deref()),
        Command::Var {
            config,
            as_of,
            confidence,
        } => run_var(&config, as_of.as_deref(), confidence),
        Command::CacheStats { config } => run_cache_stats(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ChainRiskError> {
    let config = FileConfigAdapter::from_file(path)?;
    info!("loaded config from {}", config.source());
    Ok(config)
}

pub fn cache_options(config: &dyn ConfigPort) -> CacheOptions {
    CacheOptions {
        enabled: config.get_bool("cache", "enabled", true),
        reset: config.get_bool("cache", "reset", false),
    }
}

/// The store named by `[cache] backend`, defaulting to JSON.
pub fn open_store(config: &dyn ConfigPort) -> Result<Box<dyn CacheStore>, ChainRiskError> {
    let path = config.require_string("cache", "path")?;
    let backend = config
        .get_string("cache", "backend")
        .unwrap_or_else(|| "json".to_string());

    match backend.trim() {
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Box::new(
            crate::adapters::sqlite_store::SqliteStore::from_config(config)?,
        )),
        "json" => Ok(Box::new(JsonFileStore::new(path))),
        other => Err(ChainRiskError::ConfigInvalid {
            section: "cache".into(),
            key: "backend".into(),
            reason: format!("unsupported backend '{other}'"),
        }),
    }
}

pub fn open_cache<'a>(
    config: &dyn ConfigPort,
    chain: &'a dyn ChainPort,
) -> Result<ComputationCache<'a>, ChainRiskError> {
    let options = cache_options(config);
    if !options.enabled {
        info!("cache disabled");
        return Ok(ComputationCache::disabled(chain));
    }
    ComputationCache::open(chain, open_store(config)?, options)
}

/// The valuation time: the override if given, else `[portfolio] as_of`.
/// A bare date stands for the end of that day in UTC.
pub fn resolve_as_of(
    override_as_of: Option<&str>,
    config: &dyn ConfigPort,
) -> Result<AsOf, ChainRiskError> {
    let raw = match override_as_of {
        Some(s) => s.to_string(),
        None => config.require_string("portfolio", "as_of")?,
    };
    Ok(AsOf::parse(&raw)?.at_end_of_day())
}

pub fn scenario_params(config: &dyn ConfigPort, as_of: AsOf) -> Result<PlanParams, ChainRiskError> {
    let window = config.get_span("var", "window")?.unwrap_or(Span::days(90));
    let interval = config.get_span("var", "interval")?.unwrap_or(Span::days(1));
    let rolling_interval = config.get_int("var", "rolling_interval", 1);
    let rolling_interval =
        usize::try_from(rolling_interval).map_err(|_| ChainRiskError::ConfigInvalid {
            section: "var".into(),
            key: "rolling_interval".into(),
            reason: format!("rolling_interval must not be negative, got {rolling_interval}"),
        })?;
    Ok(PlanParams::scenario(as_of, window, interval, rolling_interval))
}

fn load_portfolio_positions(config: &dyn ConfigPort) -> Result<Vec<Position>, ChainRiskError> {
    let path = config.require_string("portfolio", "positions_csv")?;
    let positions = load_positions(&path)?;
    info!("loaded {} positions from {path}", positions.len());
    Ok(positions)
}

/// Builds the end-of-day market and values every position.
pub fn value_pipeline(
    config: &dyn ConfigPort,
    chain: &dyn ChainPort,
    positions: &[Position],
    as_of: AsOf,
) -> Result<(Vec<ValueRow>, CacheStats), ChainRiskError> {
    let cache = open_cache(config, chain)?;
    let mut pm = PortfolioManager::from_positions(positions, as_of, cache)?;
    let market = pm.prepare_market(Tag::Eod, &PlanParams::eod(as_of))?;
    let rows = pm.value(&market, None)?;
    let stats = pm.close()?;
    Ok((rows, stats))
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarReport {
    pub rows: Vec<ScenarioRow>,
    pub result: Option<VarResult>,
    pub stats: CacheStats,
}

/// Builds both markets, produces the scenario table and its VaR.
pub fn var_pipeline(
    config: &dyn ConfigPort,
    chain: &dyn ChainPort,
    positions: &[Position],
    as_of: AsOf,
    confidence: f64,
) -> Result<VarReport, ChainRiskError> {
    check_confidence(confidence)?;
    let params = scenario_params(config, as_of)?;
    let cache = open_cache(config, chain)?;
    let mut pm = PortfolioManager::from_positions(positions, as_of, cache)?;

    let market = pm.prepare_market(Tag::Eod, &PlanParams::eod(as_of))?;
    let scenarios = pm.prepare_market(Tag::EodVarScenario, &params)?;
    let rows = pm.value_scenarios(&market, &scenarios, None)?;
    let stats = pm.close()?;

    let pnl: Vec<f64> = portfolio_pnl_by_scenario(&rows)
        .into_iter()
        .map(|(_, value)| value)
        .collect();
    debug!("{} scenarios for {} rows", pnl.len(), rows.len());
    Ok(VarReport {
        result: historical_var(&pnl, confidence),
        rows,
        stats,
    })
}

fn csv_error(e: csv::Error) -> ChainRiskError {
    ChainRiskError::Io(io::Error::from(e))
}

pub fn write_values<W: Write>(out: W, rows: &[ValueRow]) -> Result<(), ChainRiskError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["TRADE_ID", "VALUE"]).map_err(csv_error)?;
    for row in rows {
        writer
            .write_record([row.trade_id.clone(), row.value.to_string()])
            .map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_scenarios<W: Write>(out: W, rows: &[ScenarioRow]) -> Result<(), ChainRiskError> {
    let mut writer = csv::Writer::from_writer(out);
    writer
        .write_record(["SCEN_ID", "TRADE_ID", "VALUE"])
        .map_err(csv_error)?;
    for row in rows {
        writer
            .write_record([
                row.scenario_id.to_string(),
                row.trade_id.clone(),
                row.value.to_string(),
            ])
            .map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(())
}

fn run_value(config_path: &PathBuf, as_of: Option<&str>) -> Result<(), ChainRiskError> {
    let config = load_config(config_path)?;
    validate_cache_config(&config)?;
    validate_portfolio_config(&config)?;

    let as_of = resolve_as_of(as_of, &config)?;
    let chain = CsvChainAdapter::from_config(&config)?;
    let positions = load_portfolio_positions(&config)?;

    info!("valuing {} positions as of {as_of}", positions.len());
    let (rows, _) = value_pipeline(&config, &chain, &positions, as_of)?;
    write_values(io::stdout().lock(), &rows)
}

fn run_var(
    config_path: &PathBuf,
    as_of: Option<&str>,
    confidence: Option<f64>,
) -> Result<(), ChainRiskError> {
    let config = load_config(config_path)?;
    validate_cache_config(&config)?;
    validate_portfolio_config(&config)?;
    validate_var_config(&config)?;

    let as_of = resolve_as_of(as_of, &config)?;
    let confidence = confidence.unwrap_or_else(|| config.get_double("var", "confidence", 0.99));
    check_confidence(confidence)?;
    let chain = CsvChainAdapter::from_config(&config)?;
    let positions = load_portfolio_positions(&config)?;

    info!(
        "computing scenarios for {} positions as of {as_of}",
        positions.len()
    );
    let report = var_pipeline(&config, &chain, &positions, as_of, confidence)?;
    write_scenarios(io::stdout().lock(), &report.rows)?;

    match report.result {
        Some(var) => eprintln!(
            "VaR({:.1}%) over {} scenarios: {:.6} (expected shortfall {:.6})",
            var.confidence * 100.0,
            var.scenario_count,
            var.var,
            var.expected_shortfall
        ),
        None => warn!("no scenarios available, VaR not computed"),
    }
    Ok(())
}

/// Entry counts per method for the configured store.
pub fn store_stats(config: &dyn ConfigPort) -> Result<BTreeMap<MethodKind, usize>, ChainRiskError> {
    let store = open_store(config)?;
    let entries = store.load()?;
    info!("{} holds {} entries", store.describe(), entries.len());
    count_by_method(entries.values())
}

fn run_cache_stats(config_path: &PathBuf) -> Result<(), ChainRiskError> {
    let config = load_config(config_path)?;
    validate_cache_config(&config)?;
    let counts = store_stats(&config)?;

    let mut out = io::stdout().lock();
    writeln!(out, "METHOD,ENTRIES")?;
    for (kind, count) in counts {
        writeln!(out, "{kind},{count}")?;
    }
    Ok(())
}
