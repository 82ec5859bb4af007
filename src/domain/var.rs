//! Historical-simulation Value-at-Risk over scenario PnL.

use crate::domain::portfolio::ScenarioRow;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct VarResult {
    pub confidence: f64,
    pub scenario_count: usize,
    /// Loss at the confidence level, positive for a loss.
    pub var: f64,
    /// Mean loss over the scenarios at or beyond the VaR scenario.
    pub expected_shortfall: f64,
}

/// Total PnL per scenario id, ascending by id.
pub fn portfolio_pnl_by_scenario(rows: &[ScenarioRow]) -> Vec<(usize, f64)> {
    let mut totals: BTreeMap<usize, f64> = BTreeMap::new();
    for row in rows {
        *totals.entry(row.scenario_id).or_insert(0.0) += row.value;
    }
    totals.into_iter().collect()
}

/// Empirical VaR at `confidence` over scenario PnL.
///
/// The VaR scenario is the `ceil((1 - confidence) * n)`-th worst, never
/// fewer than the worst one. `None` when there are no scenarios or the
/// confidence lies outside `(0, 1)`.
pub fn historical_var(pnl: &[f64], confidence: f64) -> Option<VarResult> {
    if pnl.is_empty() || !(confidence > 0.0 && confidence < 1.0) {
        return None;
    }
    let mut sorted = pnl.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    // Tolerance keeps e.g. (1 - 0.99) * 100 from rounding up to 2.
    let tail = ((1.0 - confidence) * n as f64 - 1e-9).ceil() as usize;
    let idx = tail.clamp(1, n) - 1;

    let worst = &sorted[..=idx];
    let expected_shortfall = -worst.iter().sum::<f64>() / worst.len() as f64;

    Some(VarResult {
        confidence,
        scenario_count: n,
        var: -sorted[idx],
        expected_shortfall,
    })
}
