//! Common types and utilities for Larder
//!
//! This crate holds the pieces shared across the workspace: the entry
//! identifier type, the error type, and policy configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::IndexConfig;
pub use error::{Error, Result};
pub use types::EntryHash;
