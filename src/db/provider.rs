//! Temporary databases on an already running server.
//!
//! The provider connects through an admin data source, creates a uniquely
//! named database, and hands it out as an [`EmbeddedDatabase`] whose first
//! close callback drops that database again. Starting the server itself is
//! out of scope; point the admin source at one.

use crate::config::DataSourceConfig;
use crate::db::data_source::{BackingSource, DataSource, DbConnection};
use crate::db::embedded::EmbeddedDatabase;
use crate::error::{DbError, DbResult};
use crate::models::{ClosePolicy, DatabaseType};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_DATABASE_PREFIX: &str = "embedded";

/// Longest accepted prefix; keeps generated names within PostgreSQL's 63-byte limit.
const MAX_PREFIX_LEN: usize = 30;

#[derive(Debug)]
pub struct TemporaryDatabaseProvider {
    admin: Arc<BackingSource>,
    prefix: String,
    close_policy: Option<ClosePolicy>,
}

impl TemporaryDatabaseProvider {
    /// Create a provider that issues DDL through `admin`.
    pub fn new(admin: impl Into<BackingSource>) -> Self {
        Self {
            admin: Arc::new(admin.into()),
            prefix: DEFAULT_DATABASE_PREFIX.to_string(),
            close_policy: None,
        }
    }

    /// Create a provider from a parsed admin URL, honoring its `close_policy` option.
    pub fn from_config(config: &DataSourceConfig) -> DbResult<Self> {
        let mut provider = Self::new(config.build()?);
        provider.close_policy = config.close_policy;
        Ok(provider)
    }

    /// Use `prefix` for generated database names.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> DbResult<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        self.prefix = prefix;
        Ok(self)
    }

    /// Override the close policy of handed-out handles.
    pub fn with_close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close_policy = Some(policy);
        self
    }

    pub fn database_type(&self) -> DatabaseType {
        self.admin.database_type()
    }

    /// Create a fresh database and wrap it in a managed handle.
    pub async fn create_database(&self) -> DbResult<EmbeddedDatabase> {
        let db_type = self.admin.database_type();
        let name = generate_database_name(&self.prefix);

        let sql = format!("CREATE DATABASE {}", quote_identifier(db_type, &name));
        let mut conn = self.admin.connection().await?;
        let created = conn.execute_raw(&sql).await;
        close_quietly(conn).await;
        created?;

        info!(database = %name, db_type = %db_type, "Temporary database created");

        match self.wrap_database(&name) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let Err(drop_err) = drop_database(&self.admin, &name).await {
                    warn!(database = %name, error = %drop_err, "Failed to drop orphaned database");
                }
                Err(e)
            }
        }
    }

    /// Hand out an existing database `name`, dropping it when the handle closes.
    fn wrap_database(&self, name: &str) -> DbResult<EmbeddedDatabase> {
        let source = self.admin.for_database(name)?;
        let handle = EmbeddedDatabase::new(
            source,
            drop_database_callback(Arc::clone(&self.admin), name.to_string()),
        );
        Ok(match self.close_policy {
            Some(policy) => handle.with_close_policy(policy),
            None => handle,
        })
    }
}

fn drop_database_callback(
    admin: Arc<BackingSource>,
    database: String,
) -> impl Fn() -> BoxFuture<'static, DbResult<()>> + Send + Sync + 'static {
    move || {
        let admin = Arc::clone(&admin);
        let database = database.clone();
        async move { drop_database(&admin, &database).await }.boxed()
    }
}

async fn drop_database(admin: &BackingSource, name: &str) -> DbResult<()> {
    let db_type = admin.database_type();
    let quoted = quote_identifier(db_type, name);
    let sql = match db_type {
        // FORCE terminates sessions still attached to the database (PostgreSQL 13+)
        DatabaseType::PostgreSQL => format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quoted),
        DatabaseType::MariaDB => format!("DROP DATABASE IF EXISTS {}", quoted),
    };

    let mut conn = admin.connection().await?;
    let dropped = conn.execute_raw(&sql).await;
    close_quietly(conn).await;
    dropped?;

    info!(database = %name, "Temporary database dropped");
    Ok(())
}

async fn close_quietly(conn: DbConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "Failed to close admin connection");
    }
}

fn validate_prefix(prefix: &str) -> DbResult<()> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
        return Err(DbError::invalid_input(format!(
            "Database prefix must be 1 to {} characters",
            MAX_PREFIX_LEN
        )));
    }
    if !prefix.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(DbError::invalid_input(
            "Database prefix must start with a lowercase letter",
        ));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(DbError::invalid_input(format!(
            "Database prefix contains invalid characters: {}",
            prefix
        )));
    }
    Ok(())
}

fn generate_database_name(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

fn quote_identifier(db_type: DatabaseType, name: &str) -> String {
    match db_type {
        DatabaseType::PostgreSQL => format!("\"{}\"", name.replace('"', "\"\"")),
        DatabaseType::MariaDB => format!("`{}`", name.replace('`', "``")),
    }
}
