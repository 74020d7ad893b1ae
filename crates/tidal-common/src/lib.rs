//! Tidal common types, errors, and configuration.
//!
//! This crate provides shared definitions used by the tree and streamlet crates.

pub mod config;
pub mod error;

pub use config::{DEFAULT_PAGE_SPLIT_SIZE, MIN_PAGE_SPLIT_SIZE, TreeConfig};
pub use error::{Result, TidalError};
