//! SQLite cache store.

use crate::domain::cache::{CacheValue, StoredEntry};
use crate::domain::error::ChainRiskError;
use crate::ports::cache_store::CacheStore;
use crate::ports::config_port::ConfigPort;
use log::warn;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ErrorCode, params};
use std::collections::HashMap;
use std::fs;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY NOT NULL,
    method TEXT NOT NULL,
    value TEXT NOT NULL
);";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    label: String,
}

fn store_error(e: impl std::fmt::Display) -> ChainRiskError {
    ChainRiskError::CacheStore {
        reason: e.to_string(),
    }
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ChainRiskError> {
        Self::open(&config.require_string("cache", "path")?)
    }

    /// Opens the database at `db_path`. A file that is not a readable
    /// SQLite database is removed and recreated empty.
    pub fn open(db_path: &str) -> Result<Self, ChainRiskError> {
        let file = || SqliteConnectionManager::file(db_path);
        let label = format!("sqlite:{db_path}");

        let store = Self::connect(file(), label.clone())?;
        let created = store.conn()?.execute_batch(SCHEMA);
        match created {
            Ok(()) => Ok(store),
            Err(e) if is_unreadable(&e) => {
                warn!("cache store {label} unreadable, recreating it empty: {e}");
                drop(store);
                fs::remove_file(db_path)?;
                let store = Self::connect(file(), label)?;
                store.initialize_schema()?;
                Ok(store)
            }
            Err(e) => Err(store_error(e)),
        }
    }

    pub fn in_memory() -> Result<Self, ChainRiskError> {
        let store = Self::connect(
            SqliteConnectionManager::memory(),
            "sqlite::memory:".to_string(),
        )?;
        store.initialize_schema()?;
        Ok(store)
    }

    fn connect(manager: SqliteConnectionManager, label: String) -> Result<Self, ChainRiskError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| store_error(e))?;
        Ok(Self { pool, label })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, ChainRiskError> {
        self.pool.get().map_err(|e: r2d2::Error| store_error(e))
    }

    fn initialize_schema(&self) -> Result<(), ChainRiskError> {
        self.conn()?
            .execute_batch(SCHEMA)
            .map_err(|e: rusqlite::Error| store_error(e))
    }
}

fn is_unreadable(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

impl CacheStore for SqliteStore {
    fn load(&self) -> Result<HashMap<String, StoredEntry>, ChainRiskError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, method, value FROM cache_entries")
            .map_err(|e: rusqlite::Error| store_error(e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e: rusqlite::Error| store_error(e))?;

        let mut entries = HashMap::new();
        for row in rows {
            let (key, method, value) = row.map_err(|e: rusqlite::Error| store_error(e))?;
            let value: CacheValue = serde_json::from_str(&value)
                .map_err(|e| store_error(format!("entry {key}: {e}")))?;
            entries.insert(key, StoredEntry { method, value });
        }
        Ok(entries)
    }

    fn save(&self, entries: &HashMap<String, StoredEntry>) -> Result<(), ChainRiskError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e: rusqlite::Error| store_error(e))?;

        tx.execute("DELETE FROM cache_entries", [])
            .map_err(|e: rusqlite::Error| store_error(e))?;
        for (key, entry) in entries {
            let value = serde_json::to_string(&entry.value).map_err(store_error)?;
            tx.execute(
                "INSERT INTO cache_entries (key, method, value) VALUES (?1, ?2, ?3)",
                params![key, entry.method, value],
            )
            .map_err(|e: rusqlite::Error| store_error(e))?;
        }

        tx.commit().map_err(|e: rusqlite::Error| store_error(e))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
