//! Concrete adapter implementations for ports.

pub mod csv_chain_adapter;
pub mod csv_positions;
pub mod file_config_adapter;
pub mod json_file_store;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;
