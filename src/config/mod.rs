//! # blockdb Configuration Module
//!
//! Numeric constants live in [`constants`], grouped by the layout they
//! describe and cross-checked with compile-time assertions. Per-table runtime
//! settings (page size, free-block batch size, key seed) are carried by
//! [`TableConfig`], built through [`TableConfigBuilder`].
//!
//! ## Module Organization
//!
//! - [`constants`]: On-disk layout sizes and defaults
//! - [`table`]: `TableConfig` and its builder

pub mod constants;
pub mod table;

pub use constants::*;
pub use table::{TableConfig, TableConfigBuilder};
