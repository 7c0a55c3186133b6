//! Data models shared across the crate.
//!
//! This module re-exports all model types used throughout the library.

pub mod connection;

// Re-export commonly used types
pub use connection::{ClosePolicy, DatabaseInfo, DatabaseType, LogSettings};
