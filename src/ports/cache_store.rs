//! Durable storage port for the computation cache.

use crate::domain::cache::StoredEntry;
use crate::domain::error::ChainRiskError;
use std::collections::HashMap;

/// Whole-snapshot persistence: `load` reads every entry, `save` replaces
/// every entry. Implementations never append or write partially.
pub trait CacheStore {
    /// Returns an empty map when nothing has been stored yet.
    fn load(&self) -> Result<HashMap<String, StoredEntry>, ChainRiskError>;

    fn save(&self, entries: &HashMap<String, StoredEntry>) -> Result<(), ChainRiskError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}
