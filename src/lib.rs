//! Embedded DB Handle Library
//!
//! Managed handles for short-lived PostgreSQL and MariaDB databases used in
//! tests: uniform connection access, typed capability resolution, and
//! teardown shared by every owner of the database.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;

pub use config::{DataSourceConfig, LogConfig, PoolOptions};
pub use db::{Capability, CloseRegistry, DataSource, EmbeddedDatabase, Resolved, Wrapper};
pub use error::{DbError, DbResult};
pub use models::{ClosePolicy, DatabaseType};
