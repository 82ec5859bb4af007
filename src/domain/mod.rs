//! Core domain types and logic.

pub mod as_of;
pub mod cache;
pub mod config_validation;
pub mod error;
pub mod market;
pub mod plan;
pub mod portfolio;
pub mod recipe;
pub mod span;
pub mod tradeable;
pub mod var;
