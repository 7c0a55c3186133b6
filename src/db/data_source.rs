//! The data source contract shared by vendor sources and managed handles.
//!
//! [`DataSource`] is the uniform connection-factory surface generic code works
//! against. [`BackingSource`] is the closed set of vendor sources a handle can
//! own, and [`DbConnection`] the matching set of driver connections.

use crate::db::capability::{Capability, Resolved, Wrapper};
use crate::db::mariadb::MariaDbDataSource;
use crate::db::postgres::PgDataSource;
use crate::error::{DbError, DbResult};
use crate::impl_source_dispatch;
use crate::models::{DatabaseType, LogSettings};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sqlx::{Connection, Executor, MySqlConnection, PgConnection};
use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Log target sqlx uses for statement logging.
pub const STATEMENT_LOG_TARGET: &str = "sqlx::query";

/// A factory for database connections.
#[async_trait]
pub trait DataSource: Wrapper + Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Open a connection with the configured credentials.
    async fn connection(&self) -> DbResult<DbConnection>;

    /// Open a connection with explicit credentials.
    async fn connection_with_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> DbResult<DbConnection>;

    fn log_settings(&self) -> LogSettings;

    fn set_log_settings(&self, settings: LogSettings);

    /// Maximum time to wait for a connection to be established. Zero means no limit.
    fn login_timeout(&self) -> Duration;

    fn set_login_timeout(&self, timeout: Duration);

    /// Root log target connections of this source report under.
    fn log_target(&self) -> &'static str {
        STATEMENT_LOG_TARGET
    }
}

/// Mutable per-source settings applied at connect time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceSettings {
    pub log: LogSettings,
    pub login_timeout: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            log: LogSettings::default(),
            login_timeout: Duration::from_secs(crate::config::DEFAULT_LOGIN_TIMEOUT_SECS),
        }
    }
}

/// Settings cell shared by the vendor sources.
#[derive(Debug, Default)]
pub(crate) struct SettingsCell(RwLock<SourceSettings>);

impl SettingsCell {
    pub fn get(&self) -> SourceSettings {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update(&self, f: impl FnOnce(&mut SourceSettings)) {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

/// Run a driver connect under the login timeout.
pub(crate) async fn with_login_timeout<T, F>(timeout: Duration, connect: F) -> DbResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    if timeout.is_zero() {
        return connect.await.map_err(DbError::from);
    }
    match tokio::time::timeout(timeout, connect).await {
        Ok(result) => result.map_err(DbError::from),
        Err(_) => Err(DbError::timeout("database login", timeout)),
    }
}

/// Database-specific connection.
#[derive(Debug)]
pub enum DbConnection {
    Postgres(PgConnection),
    MySql(MySqlConnection),
}

impl DbConnection {
    pub fn database_type(&self) -> DatabaseType {
        match self {
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::MySql(_) => DatabaseType::MariaDB,
        }
    }

    /// Check the connection is still alive.
    pub async fn ping(&mut self) -> DbResult<()> {
        match self {
            DbConnection::Postgres(conn) => conn.ping().await.map_err(DbError::from),
            DbConnection::MySql(conn) => conn.ping().await.map_err(DbError::from),
        }
    }

    /// Run an unprepared statement (DDL and the like), returning affected rows.
    ///
    /// The future is boxed so it stays `Send` when awaited from `'static`
    /// contexts such as close callbacks.
    pub fn execute_raw<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, DbResult<u64>> {
        match self {
            DbConnection::Postgres(conn) => {
                let conn: &'a mut PgConnection = conn;
                async move {
                    let result = conn.execute(sqlx::raw_sql(sql)).await?;
                    Ok::<_, DbError>(result.rows_affected())
                }
                .boxed()
            }
            DbConnection::MySql(conn) => {
                let conn: &'a mut MySqlConnection = conn;
                async move {
                    let result = conn.execute(sqlx::raw_sql(sql)).await?;
                    Ok::<_, DbError>(result.rows_affected())
                }
                .boxed()
            }
        }
    }

    /// Gracefully close the connection.
    pub async fn close(self) -> DbResult<()> {
        match self {
            DbConnection::Postgres(conn) => conn.close().await.map_err(DbError::from),
            DbConnection::MySql(conn) => conn.close().await.map_err(DbError::from),
        }
    }
}

/// Vendor data source owned by a managed handle.
#[derive(Debug)]
pub enum BackingSource {
    Postgres(PgDataSource),
    MariaDb(MariaDbDataSource),
}

impl BackingSource {
    /// Connection URL: verbatim for PostgreSQL, composed from fields for MariaDB.
    pub fn url(&self) -> String {
        impl_source_dispatch!(self, source => source.url())
    }

    pub fn username(&self) -> &str {
        impl_source_dispatch!(self, source => source.username())
    }

    pub fn password(&self) -> Option<&str> {
        impl_source_dispatch!(self, source => source.password())
    }

    pub fn database_name(&self) -> Option<&str> {
        impl_source_dispatch!(self, source => source.database_name())
    }

    /// A source for another database on the same server with the same credentials.
    pub fn for_database(&self, database: &str) -> DbResult<BackingSource> {
        let source = match self {
            BackingSource::Postgres(source) => BackingSource::Postgres(source.for_database(database)?),
            BackingSource::MariaDb(source) => BackingSource::MariaDb(source.for_database(database)),
        };
        source.set_log_settings(self.log_settings());
        source.set_login_timeout(self.login_timeout());
        Ok(source)
    }
}

impl From<PgDataSource> for BackingSource {
    fn from(source: PgDataSource) -> Self {
        BackingSource::Postgres(source)
    }
}

impl From<MariaDbDataSource> for BackingSource {
    fn from(source: MariaDbDataSource) -> Self {
        BackingSource::MariaDb(source)
    }
}

impl Wrapper for BackingSource {
    fn adapt(&self, capability: Capability) -> Option<Resolved<'_>> {
        impl_source_dispatch!(self, source => source.adapt(capability))
    }

    fn resolve(&self, capability: Capability) -> DbResult<Resolved<'_>> {
        impl_source_dispatch!(self, source => source.resolve(capability))
    }
}

#[async_trait]
impl DataSource for BackingSource {
    fn database_type(&self) -> DatabaseType {
        impl_source_dispatch!(self, source => source.database_type())
    }

    async fn connection(&self) -> DbResult<DbConnection> {
        impl_source_dispatch!(self, source => source.connection().await)
    }

    async fn connection_with_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> DbResult<DbConnection> {
        impl_source_dispatch!(self, source => source.connection_with_credentials(username, password).await)
    }

    fn log_settings(&self) -> LogSettings {
        impl_source_dispatch!(self, source => source.log_settings())
    }

    fn set_log_settings(&self, settings: LogSettings) {
        impl_source_dispatch!(self, source => source.set_log_settings(settings))
    }

    fn login_timeout(&self) -> Duration {
        impl_source_dispatch!(self, source => source.login_timeout())
    }

    fn set_login_timeout(&self, timeout: Duration) {
        impl_source_dispatch!(self, source => source.set_login_timeout(timeout))
    }
}
