//! Typed capability resolution.
//!
//! A caller asks a handle for something that behaves like a given contract
//! (a generic data source, the handle facade itself, the vendor data source,
//! the driver connect options) by naming a [`Capability`]. Each object in a
//! wrapping chain reports what its own type satisfies through [`Wrapper::adapt`]
//! and may reach further into the objects it wraps through [`Wrapper::resolve`].
//!
//! Resolution order for a handle wrapping a backing source:
//! 1. the handle itself
//! 2. the backing source itself
//! 3. whatever the backing source resolves from the objects it wraps
//!
//! The handle always wins a tie, so asking for [`Capability::DataSource`]
//! yields the facade rather than the raw vendor source.

use crate::db::data_source::DataSource;
use crate::db::embedded::EmbeddedDatabase;
use crate::db::mariadb::MariaDbDataSource;
use crate::db::postgres::PgDataSource;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;

/// A contract a caller wants an object to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Anything that can open connections.
    DataSource,
    /// The managed handle facade, whatever its backend.
    EmbeddedDatabase,
    /// The managed handle facade for one backend.
    EmbeddedDatabaseOf(DatabaseType),
    /// The vendor data source for one backend.
    VendorDataSource(DatabaseType),
    /// The driver-level connect options for one backend.
    ConnectOptions(DatabaseType),
}

impl Capability {
    /// Every capability tag, for exhaustive probing.
    pub fn all() -> Vec<Capability> {
        let mut all = vec![Capability::DataSource, Capability::EmbeddedDatabase];
        for db_type in [DatabaseType::PostgreSQL, DatabaseType::MariaDB] {
            all.push(Capability::EmbeddedDatabaseOf(db_type));
            all.push(Capability::VendorDataSource(db_type));
            all.push(Capability::ConnectOptions(db_type));
        }
        all
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataSource => write!(f, "data source"),
            Self::EmbeddedDatabase => write!(f, "embedded database"),
            Self::EmbeddedDatabaseOf(db_type) => write!(f, "{} embedded database", db_type),
            Self::VendorDataSource(db_type) => write!(f, "{} data source", db_type),
            Self::ConnectOptions(db_type) => write!(f, "{} connect options", db_type),
        }
    }
}

/// A reference adapted to a requested capability.
#[derive(Clone, Copy)]
pub enum Resolved<'a> {
    EmbeddedDatabase(&'a EmbeddedDatabase),
    DataSource(&'a dyn DataSource),
    PgDataSource(&'a PgDataSource),
    MariaDbDataSource(&'a MariaDbDataSource),
    PgConnectOptions(&'a PgConnectOptions),
    MySqlConnectOptions(&'a MySqlConnectOptions),
}

impl<'a> Resolved<'a> {
    /// View the resolved object as a data source, if it is one.
    pub fn as_data_source(&self) -> Option<&'a dyn DataSource> {
        match *self {
            Resolved::EmbeddedDatabase(db) => Some(db),
            Resolved::DataSource(source) => Some(source),
            Resolved::PgDataSource(source) => Some(source),
            Resolved::MariaDbDataSource(source) => Some(source),
            Resolved::PgConnectOptions(_) | Resolved::MySqlConnectOptions(_) => None,
        }
    }

    pub fn as_embedded_database(&self) -> Option<&'a EmbeddedDatabase> {
        match *self {
            Resolved::EmbeddedDatabase(db) => Some(db),
            _ => None,
        }
    }

    pub fn as_pg_data_source(&self) -> Option<&'a PgDataSource> {
        match *self {
            Resolved::PgDataSource(source) => Some(source),
            _ => None,
        }
    }

    pub fn as_mariadb_data_source(&self) -> Option<&'a MariaDbDataSource> {
        match *self {
            Resolved::MariaDbDataSource(source) => Some(source),
            _ => None,
        }
    }

    pub fn as_pg_connect_options(&self) -> Option<&'a PgConnectOptions> {
        match *self {
            Resolved::PgConnectOptions(options) => Some(options),
            _ => None,
        }
    }

    pub fn as_mysql_connect_options(&self) -> Option<&'a MySqlConnectOptions> {
        match *self {
            Resolved::MySqlConnectOptions(options) => Some(options),
            _ => None,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Resolved::EmbeddedDatabase(_) => "EmbeddedDatabase",
            Resolved::DataSource(_) => "DataSource",
            Resolved::PgDataSource(_) => "PgDataSource",
            Resolved::MariaDbDataSource(_) => "MariaDbDataSource",
            Resolved::PgConnectOptions(_) => "PgConnectOptions",
            Resolved::MySqlConnectOptions(_) => "MySqlConnectOptions",
        }
    }
}

impl std::fmt::Debug for Resolved<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Resolved")
            .field(&self.variant_name())
            .finish()
    }
}

/// Capability introspection for objects that may wrap other objects.
pub trait Wrapper {
    /// Adapt `self` to `capability` if its own type satisfies it.
    ///
    /// Never looks at wrapped objects.
    fn adapt(&self, capability: Capability) -> Option<Resolved<'_>>;

    /// Resolve `capability` against `self` and anything it wraps.
    fn resolve(&self, capability: Capability) -> DbResult<Resolved<'_>> {
        self.adapt(capability)
            .ok_or_else(|| DbError::unsupported_capability(capability))
    }

    /// Whether [`Wrapper::resolve`] would succeed.
    fn supports(&self, capability: Capability) -> bool {
        self.resolve(capability).is_ok()
    }
}

/// Resolve `capability` for a handle wrapping `backing`.
pub fn resolve<'a, H, B>(handle: &'a H, backing: &'a B, capability: Capability) -> DbResult<Resolved<'a>>
where
    H: Wrapper + ?Sized,
    B: Wrapper + ?Sized,
{
    if let Some(resolved) = handle.adapt(capability) {
        return Ok(resolved);
    }
    if let Some(resolved) = backing.adapt(capability) {
        return Ok(resolved);
    }
    backing.resolve(capability)
}

/// Check matching [`resolve`] step for step.
pub fn supports<H, B>(handle: &H, backing: &B, capability: Capability) -> bool
where
    H: Wrapper + ?Sized,
    B: Wrapper + ?Sized,
{
    handle.adapt(capability).is_some()
        || backing.adapt(capability).is_some()
        || backing.supports(capability)
}
