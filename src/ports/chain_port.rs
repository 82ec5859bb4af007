//! Chain query port trait.

use crate::domain::error::ChainRiskError;
use crate::domain::span::Span;
use serde_json::Value;

/// Remote chain/ledger calls. Every call is blocking and potentially
/// expensive; the computation cache is the only caller of the two
/// `run_*` methods.
pub trait ChainPort {
    /// Runs one named computation, optionally pinned to a block.
    fn run_named_computation(
        &self,
        slug: &str,
        params: &Value,
        block_number: Option<u64>,
    ) -> Result<Value, ChainRiskError>;

    /// Runs one named computation at every `interval` across `window`,
    /// ending at `end_timestamp`.
    fn run_named_computation_over_window(
        &self,
        slug: &str,
        params: &Value,
        window: Span,
        interval: Span,
        end_timestamp: i64,
    ) -> Result<Value, ChainRiskError>;

    fn block_number_for_timestamp(&self, timestamp: i64) -> Result<u64, ChainRiskError>;
}
