//! Portfolio valuation and scenario engine.

use crate::domain::as_of::AsOf;
use crate::domain::cache::{CacheStats, ComputationCache};
use crate::domain::error::ChainRiskError;
use crate::domain::market::{Market, MarketTarget, Token};
use crate::domain::plan::{EndOfDayPlan, Plan, PlanParams, Tag};
use crate::domain::tradeable::{TokenTradeable, Trade, Tradeable, unadjusted};
use log::{debug, info};
use serde_json::json;
use std::collections::HashSet;

/// A flat holding: an instrument and a quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub token: Token,
    pub amount: f64,
}

impl Position {
    pub fn new(token: Token, amount: f64) -> Self {
        Position { token, amount }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow {
    pub trade_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRow {
    pub scenario_id: usize,
    pub trade_id: String,
    pub value: f64,
}

/// Owns the trades of one valuation run together with the cache their
/// market data flows through.
pub struct PortfolioManager<'a> {
    trades: Vec<Trade>,
    as_of: AsOf,
    cache: ComputationCache<'a>,
}

impl<'a> PortfolioManager<'a> {
    pub fn new(trades: Vec<Trade>, as_of: AsOf, cache: ComputationCache<'a>) -> Self {
        PortfolioManager {
            trades,
            as_of,
            cache,
        }
    }

    /// One token trade per position, entered at price zero, with trade id
    /// `<index>.<address>`.
    pub fn from_positions(
        positions: &[Position],
        as_of: AsOf,
        cache: ComputationCache<'a>,
    ) -> Result<Self, ChainRiskError> {
        let trades = positions
            .iter()
            .enumerate()
            .map(|(n, position)| {
                let address =
                    position
                        .token
                        .address()
                        .ok_or_else(|| ChainRiskError::InvalidPosition {
                            position: format!("#{n}"),
                            reason: "token has no address".to_string(),
                        })?;
                let trace = json!({
                    "address": address,
                    "symbol": position.token.symbol,
                    "amount": position.amount,
                });
                TokenTradeable::new(
                    format!("{n}.{address}"),
                    vec![trace],
                    as_of,
                    position.token.clone(),
                    position.amount,
                    0.0,
                )
                .map(Trade::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!("built {} trades from positions", trades.len());
        Ok(PortfolioManager::new(trades, as_of, cache))
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn as_of(&self) -> &AsOf {
        &self.as_of
    }

    /// Distinct market targets across all trades, first-seen order. A later
    /// target with an already-seen key is dropped as is.
    pub fn requires(&self) -> impl Iterator<Item = MarketTarget> + '_ {
        let mut seen = HashSet::new();
        self.trades
            .iter()
            .flat_map(|trade| trade.requires())
            .filter(move |target| seen.insert(target.key.clone()))
    }

    /// Runs one end-of-day plan per required target through the shared cache.
    pub fn prepare_market(&mut self, tag: Tag, params: &PlanParams) -> Result<Market, ChainRiskError> {
        let targets: Vec<MarketTarget> = self.requires().collect();
        info!("preparing {tag} market for {} targets", targets.len());

        let cache = &mut self.cache;
        targets
            .into_iter()
            .map(|target| {
                let key = target.key.clone();
                let result = EndOfDayPlan::new(tag, target, params.clone()).execute(cache)?;
                Ok((key, result))
            })
            .collect()
    }

    /// One row per trade, in trade order. `as_of` defaults to the
    /// portfolio's own.
    pub fn value(&self, market: &Market, as_of: Option<&AsOf>) -> Result<Vec<ValueRow>, ChainRiskError> {
        let as_of = as_of.unwrap_or(&self.as_of);
        self.trades
            .iter()
            .map(|trade| {
                Ok(ValueRow {
                    trade_id: trade.tid().to_string(),
                    value: trade.value(as_of, market, &unadjusted)?,
                })
            })
            .collect()
    }

    /// Scenario deltas for every trade, ids starting at 1, sorted by
    /// `(scenario_id, trade_id)`.
    pub fn value_scenarios(
        &self,
        market: &Market,
        market_scenarios: &Market,
        as_of: Option<&AsOf>,
    ) -> Result<Vec<ScenarioRow>, ChainRiskError> {
        let as_of = as_of.unwrap_or(&self.as_of);
        let mut rows = Vec::new();
        for trade in &self.trades {
            let deltas = trade.value_scenarios(as_of, market, market_scenarios)?;
            rows.extend(deltas.into_iter().enumerate().map(|(i, value)| ScenarioRow {
                scenario_id: i + 1,
                trade_id: trade.tid().to_string(),
                value,
            }));
        }
        rows.sort_by(|a, b| {
            a.scenario_id
                .cmp(&b.scenario_id)
                .then_with(|| a.trade_id.cmp(&b.trade_id))
        });
        Ok(rows)
    }

    /// Ends the run, persisting the cache.
    pub fn close(self) -> Result<CacheStats, ChainRiskError> {
        self.cache.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Artifact;
    use crate::domain::plan::{BLOCK_SERIES_SLUG, TOKEN_PRICE_SLUG};
    use crate::domain::span::Span;
    use crate::domain::tradeable::ContractTradeable;
    use crate::ports::chain_port::ChainPort;
    use approx::assert_relative_eq;
    use serde_json::Value;
    use std::cell::Cell;
    use std::collections::HashMap;

    const DAY: i64 = 86_400;

    /// One block per day, numbered by days since the epoch. A token's price
    /// at a block is its base price times the block number.
    struct LinearChain {
        base: HashMap<String, f64>,
        price_calls: Cell<usize>,
    }

    impl LinearChain {
        fn new(base: &[(&str, f64)]) -> Self {
            LinearChain {
                base: base.iter().map(|(a, p)| (a.to_string(), *p)).collect(),
                price_calls: Cell::new(0),
            }
        }
    }

    impl ChainPort for LinearChain {
        fn run_named_computation(
            &self,
            slug: &str,
            params: &Value,
            block_number: Option<u64>,
        ) -> Result<Value, ChainRiskError> {
            assert_eq!(slug, TOKEN_PRICE_SLUG);
            self.price_calls.set(self.price_calls.get() + 1);
            let address = params["input"]["address"].as_str().unwrap();
            let block = block_number.unwrap() as f64;
            Ok(json!({ "price": self.base[address] * block }))
        }

        fn run_named_computation_over_window(
            &self,
            slug: &str,
            _params: &Value,
            window: Span,
            interval: Span,
            end_timestamp: i64,
        ) -> Result<Value, ChainRiskError> {
            assert_eq!(slug, BLOCK_SERIES_SLUG);
            let samples = (window.seconds() / interval.seconds()).max(1);
            let series: Vec<Value> = (0..samples)
                .map(|i| {
                    let ts = end_timestamp - i * interval.seconds();
                    json!({
                        "blockNumber": ts / DAY,
                        "blockTimestamp": ts,
                        "sampleTimestamp": ts,
                    })
                })
                .collect();
            Ok(json!({ "series": series }))
        }

        fn block_number_for_timestamp(&self, timestamp: i64) -> Result<u64, ChainRiskError> {
            Ok((timestamp / DAY) as u64)
        }
    }

    fn as_of() -> AsOf {
        AsOf::parse("2022-03-01T23:59:59Z").unwrap()
    }

    fn positions(addresses: &[&str]) -> Vec<Position> {
        addresses
            .iter()
            .map(|a| Position::new(Token::from_address(*a), 2.0))
            .collect()
    }

    #[test]
    fn from_positions_numbers_trades() {
        let chain = LinearChain::new(&[]);
        let pm = PortfolioManager::from_positions(
            &positions(&["0xa", "0xb"]),
            as_of(),
            ComputationCache::disabled(&chain),
        )
        .unwrap();

        let tids: Vec<_> = pm.trades().iter().map(|t| t.tid().to_string()).collect();
        assert_eq!(tids, vec!["0.0xa", "1.0xb"]);
        let Trade::Token(first) = &pm.trades()[0] else {
            panic!("expected token trade");
        };
        assert_eq!(first.entry_price(), 0.0);
        assert_eq!(first.quantity(), 2.0);
        assert_eq!(first.traces()[0]["address"], json!("0xa"));
    }

    #[test]
    fn from_positions_rejects_missing_address() {
        let chain = LinearChain::new(&[]);
        let mut held = positions(&["0xa"]);
        held.push(Position::new(
            Token {
                address: Some(" ".into()),
                symbol: Some("CMK".into()),
            },
            1.0,
        ));
        let err = PortfolioManager::from_positions(&held, as_of(), ComputationCache::disabled(&chain))
            .err()
            .unwrap();
        assert!(matches!(err, ChainRiskError::InvalidPosition { position, .. } if position == "#1"));
    }

    #[test]
    fn from_positions_rejects_naive_as_of() {
        let chain = LinearChain::new(&[]);
        let naive = AsOf::parse("2022-03-01 00:00:00").unwrap();
        let result = PortfolioManager::from_positions(
            &positions(&["0xa"]),
            naive,
            ComputationCache::disabled(&chain),
        );
        assert!(matches!(result, Err(ChainRiskError::UnsupportedAsOf { .. })));
    }

    #[test]
    fn requires_keeps_first_registrant_per_key() {
        let chain = LinearChain::new(&[]);
        let trades = vec![
            Trade::from(
                TokenTradeable::new("0", vec![], as_of(), Token::from_address("0xa").with_symbol("A"), 1.0, 0.0)
                    .unwrap(),
            ),
            Trade::from(ContractTradeable::new("1", vec![], "0xc")),
            Trade::from(
                TokenTradeable::new("2", vec![], as_of(), Token::from_address("0xb"), 1.0, 0.0).unwrap(),
            ),
            Trade::from(
                TokenTradeable::new("3", vec![], as_of(), Token::from_address("0xa").with_symbol("B"), 1.0, 0.0)
                    .unwrap(),
            ),
        ];
        let pm = PortfolioManager::new(trades, as_of(), ComputationCache::disabled(&chain));

        let targets: Vec<_> = pm.requires().collect();
        let keys: Vec<_> = targets.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["Token.0xa", "Token.0xb"]);
        assert_eq!(
            targets[0].artifact,
            Artifact::Token(Token::from_address("0xa").with_symbol("A"))
        );
        assert_eq!(pm.requires().count(), 2);
    }

    #[test]
    fn prepare_market_prices_shared_tokens_once() {
        let chain = LinearChain::new(&[("0xa", 1.0), ("0xb", 2.0)]);
        let mut pm = PortfolioManager::from_positions(
            &positions(&["0xa", "0xb", "0xa"]),
            as_of(),
            ComputationCache::disabled(&chain),
        )
        .unwrap();

        let market = pm.prepare_market(Tag::Eod, &PlanParams::eod(as_of())).unwrap();
        assert_eq!(market.len(), 2);
        assert_eq!(chain.price_calls.get(), 2);

        let block = (as_of().timestamp_for(Tag::Eod).unwrap() / DAY) as f64;
        assert_relative_eq!(market.price("Token.0xb").unwrap(), 2.0 * block);

        let rows = pm.value(&market, None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].trade_id, "2.0xa");
        assert_relative_eq!(rows[2].value, 2.0 * block);
    }

    #[test]
    fn value_scenarios_rows_are_sorted_by_scenario_then_trade() {
        let chain = LinearChain::new(&[("0xa", 1.0), ("0xb", 1.0)]);
        let mut pm = PortfolioManager::from_positions(
            &positions(&["0xb", "0xa"]),
            as_of(),
            ComputationCache::disabled(&chain),
        )
        .unwrap();
        let market = pm.prepare_market(Tag::Eod, &PlanParams::eod(as_of())).unwrap();
        let scenarios = pm
            .prepare_market(
                Tag::EodVarScenario,
                &PlanParams::scenario(as_of(), Span::days(4), Span::days(1), 1),
            )
            .unwrap();
        assert_eq!(scenarios.scenario_count(), 3);

        let rows = pm.value_scenarios(&market, &scenarios, None).unwrap();
        assert_eq!(rows.len(), 6);
        let order: Vec<_> = rows
            .iter()
            .map(|r| (r.scenario_id, r.trade_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, "0.0xb"),
                (1, "1.0xa"),
                (2, "0.0xb"),
                (2, "1.0xa"),
                (3, "0.0xb"),
                (3, "1.0xa"),
            ]
        );
        // Prices rise one unit per day, so every one-day return is a gain.
        assert!(rows.iter().all(|r| r.value > 0.0));
    }

    #[test]
    fn contract_trades_pad_scenarios_with_zeros() {
        let chain = LinearChain::new(&[("0xa", 1.0)]);
        let trades = vec![
            Trade::from(ContractTradeable::new("c", vec![], "0xc")),
            Trade::from(
                TokenTradeable::new("t", vec![], as_of(), Token::from_address("0xa"), 1.0, 0.0).unwrap(),
            ),
        ];
        let mut pm = PortfolioManager::new(trades, as_of(), ComputationCache::disabled(&chain));
        let market = pm.prepare_market(Tag::Eod, &PlanParams::eod(as_of())).unwrap();
        let scenarios = pm
            .prepare_market(
                Tag::EodVarScenario,
                &PlanParams::scenario(as_of(), Span::days(3), Span::days(1), 1),
            )
            .unwrap();

        let rows = pm.value_scenarios(&market, &scenarios, None).unwrap();
        let contract: Vec<_> = rows.iter().filter(|r| r.trade_id == "c").collect();
        assert_eq!(contract.len(), 2);
        assert!(contract.iter().all(|r| r.value == 0.0));
    }

    #[test]
    fn failing_target_aborts_market_build() {
        let chain = LinearChain::new(&[("0xa", 1.0)]);
        let mut pm = PortfolioManager::from_positions(
            &positions(&["0xa"]),
            as_of(),
            ComputationCache::disabled(&chain),
        )
        .unwrap();
        let mut params = PlanParams::scenario(as_of(), Span::days(3), Span::days(1), 1);
        params.rolling_interval = None;

        assert!(matches!(
            pm.prepare_market(Tag::EodVarScenario, &params),
            Err(ChainRiskError::UndefinedRollingInterval)
        ));
    }
}
