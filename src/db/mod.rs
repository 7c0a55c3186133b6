//! Database handle layer.
//!
//! This module provides:
//! - Typed capability resolution across a handle and what it wraps
//! - The data source contract and the PostgreSQL / MariaDB sources
//! - The close callback registry shared by a handle's owners
//! - The managed embedded database handle
//! - A pool decorator and a temporary database provider built on the handle

pub mod capability;
pub mod close_registry;
pub mod data_source;
pub mod embedded;
pub mod macros;
pub mod mariadb;
pub mod pool;
pub mod postgres;
pub mod provider;

pub use capability::{Capability, Resolved, Wrapper};
pub use close_registry::{CloseCallback, CloseRegistry, DrainReport};
pub use data_source::{BackingSource, DataSource, DbConnection};
pub use embedded::EmbeddedDatabase;
pub use mariadb::MariaDbDataSource;
pub use pool::{DbPool, attach_pool};
pub use postgres::PgDataSource;
pub use provider::TemporaryDatabaseProvider;
