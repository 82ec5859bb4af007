//! Port traits for the external collaborators the valuation core consumes.

pub mod cache_store;
pub mod chain_port;
pub mod config_port;
