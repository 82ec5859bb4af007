//! Persistent memoization of external chain computations.
//!
//! Entries are loaded in full when the cache is opened and written back in
//! full when it is closed or dropped. Nothing is persisted mid-run.

use crate::domain::error::ChainRiskError;
use crate::domain::plan::BlockResolution;
use crate::domain::recipe::{Method, MethodKind, Recipe};
use crate::ports::cache_store::CacheStore;
use crate::ports::chain_port::ChainPort;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// A post-processed computation result, as held in memory and on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CacheValue {
    Raw(Value),
    BlockResolution(BlockResolution),
}

impl CacheValue {
    pub fn into_raw(self) -> Result<Value, ChainRiskError> {
        match self {
            CacheValue::Raw(value) => Ok(value),
            CacheValue::BlockResolution(_) => Err(ChainRiskError::UnexpectedResult {
                reason: "expected a raw computation result, found a block resolution".into(),
            }),
        }
    }

    pub fn into_block_resolution(self) -> Result<BlockResolution, ChainRiskError> {
        match self {
            CacheValue::BlockResolution(resolution) => Ok(resolution),
            CacheValue::Raw(_) => Err(ChainRiskError::UnexpectedResult {
                reason: "expected a block resolution, found a raw computation result".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub method: String,
    pub value: CacheValue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub total: u64,
}

impl CacheStats {
    /// Hit percentage in `[0, 100]`; zero before any request.
    pub fn hit_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hits as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub enabled: bool,
    pub reset: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            enabled: true,
            reset: false,
        }
    }
}

/// Entry counts per computation method. Fails on a method name this build
/// does not know.
pub fn count_by_method<'e>(
    entries: impl IntoIterator<Item = &'e StoredEntry>,
) -> Result<BTreeMap<MethodKind, usize>, ChainRiskError> {
    let mut counts = BTreeMap::new();
    for entry in entries {
        let kind: MethodKind = entry.method.parse()?;
        *counts.entry(kind).or_insert(0) += 1;
    }
    Ok(counts)
}

pub struct ComputationCache<'a> {
    chain: &'a dyn ChainPort,
    store: Option<Box<dyn CacheStore>>,
    entries: HashMap<String, StoredEntry>,
    stats: CacheStats,
    dirty: bool,
    closed: bool,
}

impl<'a> ComputationCache<'a> {
    /// Opens the cache over `store`.
    ///
    /// With `reset`, the store is overwritten with an empty snapshot right
    /// away. An unreadable store is logged and treated as empty; it is
    /// overwritten at the next flush.
    pub fn open(
        chain: &'a dyn ChainPort,
        store: Box<dyn CacheStore>,
        options: CacheOptions,
    ) -> Result<Self, ChainRiskError> {
        if !options.enabled {
            return Ok(Self::disabled(chain));
        }

        let mut dirty = false;
        let entries = if options.reset {
            let empty = HashMap::new();
            store.save(&empty)?;
            empty
        } else {
            match store.load() {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "cache store {} unreadable, starting empty: {e}",
                        store.describe()
                    );
                    dirty = true;
                    HashMap::new()
                }
            }
        };
        debug!(
            "opened cache store {} with {} entries",
            store.describe(),
            entries.len()
        );

        Ok(ComputationCache {
            chain,
            store: Some(store),
            entries,
            stats: CacheStats::default(),
            dirty,
            closed: false,
        })
    }

    /// A cache that memoizes nothing and never persists.
    pub fn disabled(chain: &'a dyn ChainPort) -> Self {
        ComputationCache {
            chain,
            store: None,
            entries: HashMap::new(),
            stats: CacheStats::default(),
            dirty: false,
            closed: false,
        }
    }

    pub fn chain(&self) -> &'a dyn ChainPort {
        self.chain
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn execute(&mut self, recipe: &Recipe) -> Result<CacheValue, ChainRiskError> {
        if self.is_enabled() {
            if let Some(entry) = self.entries.get(&recipe.key) {
                self.stats.hits += 1;
                self.stats.total += 1;
                debug!("cache hit {}", recipe.key);
                return Ok(entry.value.clone());
            }
        }

        debug!("cache miss {} via {}", recipe.key, recipe.method.slug());
        let raw = match &recipe.method {
            Method::PointInTime {
                slug,
                params,
                block_number,
            } => self.chain.run_named_computation(slug, params, *block_number)?,
            Method::HistoricalSeries {
                slug,
                params,
                window,
                interval,
                end_timestamp,
            } => self.chain.run_named_computation_over_window(
                slug,
                params,
                *window,
                *interval,
                *end_timestamp,
            )?,
        };
        let value = (recipe.post_process)(raw)?;
        self.stats.total += 1;

        if self.is_enabled() {
            self.entries.insert(
                recipe.key.clone(),
                StoredEntry {
                    method: recipe.method.kind().as_str().to_string(),
                    value: value.clone(),
                },
            );
            self.dirty = true;
        }

        Ok(value)
    }

    /// Counts held entries per computation method.
    pub fn stats_by_method(&self) -> Result<BTreeMap<MethodKind, usize>, ChainRiskError> {
        count_by_method(self.entries.values())
    }

    /// Writes the snapshot if anything changed since the last write.
    pub fn flush(&mut self) -> Result<(), ChainRiskError> {
        if let Some(store) = &self.store {
            if self.dirty {
                store.save(&self.entries)?;
                debug!(
                    "saved {} entries to {}",
                    self.entries.len(),
                    store.describe()
                );
                self.dirty = false;
            }
        }
        Ok(())
    }

    /// Flushes and releases the cache, returning its counters.
    pub fn close(mut self) -> Result<CacheStats, ChainRiskError> {
        self.flush()?;
        self.log_stats();
        self.closed = true;
        Ok(self.stats)
    }

    fn log_stats(&self) {
        if self.is_enabled() {
            info!(
                "local cache hit {} for {} requests rate={:.1}%",
                self.stats.hits,
                self.stats.total,
                self.stats.hit_rate()
            );
        }
    }
}

impl Drop for ComputationCache<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.flush() {
            warn!("failed to persist cache on teardown: {e}");
        }
        self.log_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::span::Span;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct CountingChain {
        calls: Cell<usize>,
    }

    impl CountingChain {
        fn new() -> Self {
            CountingChain {
                calls: Cell::new(0),
            }
        }
    }

    impl ChainPort for CountingChain {
        fn run_named_computation(
            &self,
            _slug: &str,
            _params: &Value,
            block_number: Option<u64>,
        ) -> Result<Value, ChainRiskError> {
            self.calls.set(self.calls.get() + 1);
            Ok(json!({ "price": block_number.unwrap_or(0) as f64 }))
        }

        fn run_named_computation_over_window(
            &self,
            _slug: &str,
            _params: &Value,
            _window: Span,
            _interval: Span,
            end_timestamp: i64,
        ) -> Result<Value, ChainRiskError> {
            self.calls.set(self.calls.get() + 1);
            Ok(json!({ "series": [], "end": end_timestamp }))
        }

        fn block_number_for_timestamp(&self, timestamp: i64) -> Result<u64, ChainRiskError> {
            Ok(timestamp as u64)
        }
    }

    #[derive(Clone, Default)]
    struct MemoryStore {
        saved: Rc<RefCell<Option<HashMap<String, StoredEntry>>>>,
        saves: Rc<Cell<usize>>,
        corrupt: bool,
    }

    impl CacheStore for MemoryStore {
        fn load(&self) -> Result<HashMap<String, StoredEntry>, ChainRiskError> {
            if self.corrupt {
                return Err(ChainRiskError::CacheStore {
                    reason: "truncated".into(),
                });
            }
            Ok(self.saved.borrow().clone().unwrap_or_default())
        }

        fn save(&self, entries: &HashMap<String, StoredEntry>) -> Result<(), ChainRiskError> {
            self.saves.set(self.saves.get() + 1);
            *self.saved.borrow_mut() = Some(entries.clone());
            Ok(())
        }

        fn describe(&self) -> String {
            "memory".into()
        }
    }

    fn price_recipe(block: u64) -> Recipe {
        Recipe::new(
            format!("Token.0x1.run_model.{block}"),
            "Token.0x1",
            Method::PointInTime {
                slug: "token.price-ext".into(),
                params: json!({}),
                block_number: Some(block),
            },
        )
    }

    fn doubled(value: Value) -> Result<CacheValue, ChainRiskError> {
        let price = value["price"].as_f64().unwrap_or_default();
        Ok(CacheValue::Raw(json!({ "price": price * 2.0 })))
    }

    #[test]
    fn second_execution_is_a_hit() {
        let chain = CountingChain::new();
        let mut cache =
            ComputationCache::open(&chain, Box::new(MemoryStore::default()), CacheOptions::default())
                .unwrap();

        let first = cache.execute(&price_recipe(7)).unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 0, total: 1 });
        let second = cache.execute(&price_recipe(7)).unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 1, total: 2 });

        assert_eq!(first, second);
        assert_eq!(chain.calls.get(), 1);
    }

    #[test]
    fn post_process_runs_only_on_miss() {
        let chain = CountingChain::new();
        let mut cache = ComputationCache::open(
            &chain,
            Box::new(MemoryStore::default()),
            CacheOptions::default(),
        )
        .unwrap();
        let recipe = price_recipe(3).with_post_process(doubled);

        let first = cache.execute(&recipe).unwrap();
        let second = cache.execute(&recipe).unwrap();
        assert_eq!(first, CacheValue::Raw(json!({ "price": 6.0 })));
        assert_eq!(second, first);
    }

    #[test]
    fn disabled_cache_always_calls_through() {
        let chain = CountingChain::new();
        let store = MemoryStore::default();
        let options = CacheOptions {
            enabled: false,
            reset: false,
        };
        let mut cache = ComputationCache::open(&chain, Box::new(store.clone()), options).unwrap();

        cache.execute(&price_recipe(1)).unwrap();
        cache.execute(&price_recipe(1)).unwrap();
        assert_eq!(chain.calls.get(), 2);
        assert_eq!(cache.stats(), CacheStats { hits: 0, total: 2 });

        let stats = cache.close().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(store.saves.get(), 0);
        assert!(store.saved.borrow().is_none());
    }

    #[test]
    fn drop_persists_dirty_entries() {
        let chain = CountingChain::new();
        let store = MemoryStore::default();
        {
            let mut cache =
                ComputationCache::open(&chain, Box::new(store.clone()), CacheOptions::default())
                    .unwrap();
            cache.execute(&price_recipe(5)).unwrap();
        }
        let saved = store.saved.borrow().clone().unwrap();
        assert!(saved.contains_key("Token.0x1.run_model.5"));
        assert_eq!(saved["Token.0x1.run_model.5"].method, "run_model");
    }

    #[test]
    fn clean_cache_is_not_rewritten() {
        let chain = CountingChain::new();
        let store = MemoryStore::default();
        let cache =
            ComputationCache::open(&chain, Box::new(store.clone()), CacheOptions::default())
                .unwrap();
        cache.close().unwrap();
        assert_eq!(store.saves.get(), 0);
    }

    #[test]
    fn persisted_entries_are_reused_across_runs() {
        let chain = CountingChain::new();
        let store = MemoryStore::default();
        {
            let mut cache =
                ComputationCache::open(&chain, Box::new(store.clone()), CacheOptions::default())
                    .unwrap();
            cache.execute(&price_recipe(9)).unwrap();
            cache.close().unwrap();
        }
        let mut cache =
            ComputationCache::open(&chain, Box::new(store.clone()), CacheOptions::default())
                .unwrap();
        cache.execute(&price_recipe(9)).unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 1, total: 1 });
        assert_eq!(chain.calls.get(), 1);
    }

    #[test]
    fn reset_discards_previous_entries() {
        let chain = CountingChain::new();
        let store = MemoryStore::default();
        {
            let mut cache =
                ComputationCache::open(&chain, Box::new(store.clone()), CacheOptions::default())
                    .unwrap();
            cache.execute(&price_recipe(2)).unwrap();
        }
        let options = CacheOptions {
            enabled: true,
            reset: true,
        };
        let cache = ComputationCache::open(&chain, Box::new(store.clone()), options).unwrap();
        assert!(cache.is_empty());
        assert!(store.saved.borrow().as_ref().unwrap().is_empty());
    }

    #[test]
    fn corrupt_store_loads_empty_and_is_overwritten() {
        let chain = CountingChain::new();
        let store = MemoryStore {
            corrupt: true,
            ..MemoryStore::default()
        };
        let cache =
            ComputationCache::open(&chain, Box::new(store.clone()), CacheOptions::default())
                .unwrap();
        assert!(cache.is_empty());
        assert!(cache.is_dirty());
        cache.close().unwrap();
        assert_eq!(store.saves.get(), 1);
    }

    #[test]
    fn stats_by_method_counts_entries() {
        let chain = CountingChain::new();
        let mut cache = ComputationCache::open(
            &chain,
            Box::new(MemoryStore::default()),
            CacheOptions::default(),
        )
        .unwrap();
        cache.execute(&price_recipe(1)).unwrap();
        cache.execute(&price_recipe(2)).unwrap();
        cache
            .execute(&Recipe::new(
                "run_model_historical.finance.get-one.1 day.1 day.0",
                "HistoricalBlock",
                Method::HistoricalSeries {
                    slug: "finance.get-one".into(),
                    params: json!({}),
                    window: Span::days(1),
                    interval: Span::days(1),
                    end_timestamp: 0,
                },
            ))
            .unwrap();

        let counts = cache.stats_by_method().unwrap();
        assert_eq!(counts[&MethodKind::PointInTime], 2);
        assert_eq!(counts[&MethodKind::HistoricalSeries], 1);
    }

    #[test]
    fn foreign_method_names_surface_as_unknown_method() {
        let chain = CountingChain::new();
        let store = MemoryStore::default();
        let mut foreign = HashMap::new();
        foreign.insert(
            "k".to_string(),
            StoredEntry {
                method: "run_sql".into(),
                value: CacheValue::Raw(json!(1)),
            },
        );
        *store.saved.borrow_mut() = Some(foreign);

        let cache =
            ComputationCache::open(&chain, Box::new(store), CacheOptions::default()).unwrap();
        assert!(matches!(
            cache.stats_by_method(),
            Err(ChainRiskError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn hit_rate_handles_zero_requests() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        assert_eq!(CacheStats { hits: 1, total: 4 }.hit_rate(), 25.0);
    }
}
