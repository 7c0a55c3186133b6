//! The managed embedded database handle.
//!
//! [`EmbeddedDatabase`] is the object test code holds in place of a raw vendor
//! data source. It owns exactly one [`BackingSource`] and one [`CloseRegistry`],
//! forwards connection requests, resolves capabilities with itself taking
//! priority over the backing source, and releases the resource through the
//! registry.
//!
//! # Lifecycle
//!
//! `Open -> Closed`. The first `close()` runs every registered callback under
//! the handle's [`ClosePolicy`] and moves the handle to `Closed` whether or not
//! a callback failed. Later `close()` calls are no-ops. Once closed, opening
//! connections and registering callbacks fail with [`DbError::Closed`].
//!
//! Concurrent `close()` calls are serialized: a second caller waits for the
//! first drain to finish and then returns without running anything.

use crate::db::capability::{self, Capability, Resolved, Wrapper};
use crate::db::close_registry::CloseRegistry;
use crate::db::data_source::{BackingSource, DataSource, DbConnection};
use crate::error::{DbError, DbResult};
use crate::models::{ClosePolicy, DatabaseInfo, DatabaseType, LogSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct EmbeddedDatabase {
    id: String,
    source: BackingSource,
    registry: CloseRegistry,
    policy: ClosePolicy,
    close_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    created_at: DateTime<Utc>,
}

impl EmbeddedDatabase {
    /// Wrap `source`, releasing it through `close_callback`.
    pub fn new<F, Fut>(source: impl Into<BackingSource>, close_callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DbResult<()>> + Send + 'static,
    {
        Self::with_registry(source, CloseRegistry::with_callback(close_callback))
    }

    /// Wrap `source` around an existing registry, shared with other owners.
    pub fn with_registry(source: impl Into<BackingSource>, registry: CloseRegistry) -> Self {
        let source = source.into();
        let policy = source.database_type().default_close_policy();
        let id = source.database_name().unwrap_or("embedded").to_string();

        info!(
            database = %id,
            db_type = %source.database_type(),
            close_policy = %policy,
            "Embedded database handle created"
        );

        Self {
            id,
            source,
            registry,
            policy,
            close_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            created_at: Utc::now(),
        }
    }

    /// Override the teardown policy chosen for this handle kind.
    pub fn with_close_policy(mut self, policy: ClosePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn close_policy(&self) -> ClosePolicy {
        self.policy
    }

    /// Connection URL of the backing database.
    pub fn url(&self) -> String {
        self.source.url()
    }

    pub fn username(&self) -> &str {
        self.source.username()
    }

    pub fn password(&self) -> Option<&str> {
        self.source.password()
    }

    /// Alternative names this database is known under. Always empty here.
    pub fn aliases(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// A shared reference to the registry, for owners that register later.
    pub fn close_registry(&self) -> CloseRegistry {
        self.registry.clone()
    }

    /// Register an additional teardown callback.
    pub fn register_close_callback<F, Fut>(&self, callback: F) -> DbResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DbResult<()>> + Send + 'static,
    {
        self.ensure_open()?;
        if !self.registry.try_register(callback) {
            return Err(DbError::closed(&self.id));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn info(&self) -> DatabaseInfo {
        DatabaseInfo {
            id: self.id.clone(),
            database_type: self.source.database_type(),
            database: self.source.database_name().map(String::from),
            close_policy: self.policy,
            close_callbacks: self.registry.len(),
            created_at: self.created_at,
            closed: self.is_closed(),
        }
    }

    /// Release the database by running every registered close callback.
    ///
    /// # Errors
    ///
    /// Under [`ClosePolicy::Strict`], the first failing callback aborts the
    /// remaining ones and is reported as [`DbError::ReleaseFailed`]. Under
    /// [`ClosePolicy::Lenient`] this never fails; callback failures are logged.
    pub async fn close(&self) -> DbResult<()> {
        let _guard = self.close_lock.lock().await;

        if self.closed.swap(true, Ordering::AcqRel) {
            debug!(database = %self.id, "Database already closed");
            return Ok(());
        }

        info!(
            database = %self.id,
            close_policy = %self.policy,
            callbacks = self.registry.len(),
            "Releasing database"
        );

        match self.registry.seal_and_run(self.policy).await {
            Ok(report) => {
                info!(
                    database = %self.id,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "Database released"
                );
                Ok(())
            }
            Err(e) => Err(DbError::release_failed(&self.id, e)),
        }
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::closed(&self.id));
        }
        Ok(())
    }
}

impl Wrapper for EmbeddedDatabase {
    fn adapt(&self, capability: Capability) -> Option<Resolved<'_>> {
        match capability {
            Capability::DataSource => Some(Resolved::DataSource(self)),
            Capability::EmbeddedDatabase => Some(Resolved::EmbeddedDatabase(self)),
            Capability::EmbeddedDatabaseOf(db_type) if db_type == self.database_type() => {
                Some(Resolved::EmbeddedDatabase(self))
            }
            _ => None,
        }
    }

    fn resolve(&self, capability: Capability) -> DbResult<Resolved<'_>> {
        capability::resolve(self, &self.source, capability)
    }

    fn supports(&self, capability: Capability) -> bool {
        capability::supports(self, &self.source, capability)
    }
}

#[async_trait]
impl DataSource for EmbeddedDatabase {
    fn database_type(&self) -> DatabaseType {
        self.source.database_type()
    }

    async fn connection(&self) -> DbResult<DbConnection> {
        self.ensure_open()?;
        self.source.connection().await
    }

    async fn connection_with_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> DbResult<DbConnection> {
        self.ensure_open()?;
        self.source
            .connection_with_credentials(username, password)
            .await
    }

    fn log_settings(&self) -> LogSettings {
        self.source.log_settings()
    }

    fn set_log_settings(&self, settings: LogSettings) {
        self.source.set_log_settings(settings);
    }

    fn login_timeout(&self) -> Duration {
        self.source.login_timeout()
    }

    fn set_login_timeout(&self, timeout: Duration) {
        self.source.set_login_timeout(timeout);
    }

    fn log_target(&self) -> &'static str {
        self.source.log_target()
    }
}

impl std::fmt::Debug for EmbeddedDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedDatabase")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for EmbeddedDatabase {
    fn drop(&mut self) {
        if !self.is_closed() && !self.registry.is_empty() {
            warn!(
                database = %self.id,
                callbacks = self.registry.len(),
                "Embedded database dropped without close - teardown callbacks did not run"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mariadb::MariaDbDataSource;
    use crate::db::postgres::PgDataSource;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn postgres(url: &str) -> EmbeddedDatabase {
        EmbeddedDatabase::new(PgDataSource::from_url(url).unwrap(), || async { Ok(()) })
    }

    fn mariadb() -> EmbeddedDatabase {
        let source = MariaDbDataSource::new("localhost", 3306, "test")
            .with_user("admin")
            .with_password("secret");
        EmbeddedDatabase::new(source, || async { Ok(()) })
    }

    #[test]
    fn test_handle_wins_data_source_tie() {
        let db = postgres("postgres://admin@localhost:5432/test");
        let resolved = db.resolve(Capability::DataSource).unwrap();
        let source = resolved.as_data_source().unwrap();
        assert!(std::ptr::addr_eq(
            source as *const dyn DataSource,
            &db as *const EmbeddedDatabase
        ));
    }

    #[test]
    fn test_resolves_handle_for_own_kind_only() {
        let db = mariadb();
        let own = db
            .resolve(Capability::EmbeddedDatabaseOf(DatabaseType::MariaDB))
            .unwrap();
        assert!(std::ptr::eq(own.as_embedded_database().unwrap(), &db));
        assert!(
            db.resolve(Capability::EmbeddedDatabaseOf(DatabaseType::PostgreSQL))
                .is_err()
        );
    }

    #[test]
    fn test_resolves_backing_source_and_nested_options() {
        let db = postgres("postgres://admin@localhost:5432/test");
        let vendor = db
            .resolve(Capability::VendorDataSource(DatabaseType::PostgreSQL))
            .unwrap();
        assert_eq!(vendor.as_pg_data_source().unwrap().database_name(), Some("test"));

        let options = db
            .resolve(Capability::ConnectOptions(DatabaseType::PostgreSQL))
            .unwrap();
        assert_eq!(options.as_pg_connect_options().unwrap().get_port(), 5432);
    }

    #[test]
    fn test_unsupported_capability() {
        let db = postgres("postgres://admin@localhost:5432/test");
        let err = db
            .resolve(Capability::ConnectOptions(DatabaseType::MariaDB))
            .unwrap_err();
        assert!(matches!(err, DbError::UnsupportedCapability { .. }));
    }

    #[test]
    fn test_supports_consistent_with_resolve() {
        for db in [postgres("postgres://admin@localhost:5432/test"), mariadb()] {
            for capability in Capability::all() {
                assert_eq!(
                    db.supports(capability),
                    db.resolve(capability).is_ok(),
                    "{} disagrees on {}",
                    db.database_type(),
                    capability
                );
            }
        }
    }

    #[test]
    fn test_url_strategies() {
        let url = "postgres://admin:pw@localhost:5432/test";
        assert_eq!(postgres(url).url(), url);
        assert_eq!(
            mariadb().url(),
            "mariadb://localhost:3306/test?user=admin&password=secret"
        );
    }

    #[test]
    fn test_aliases_empty() {
        let db = mariadb();
        assert!(db.aliases().is_empty());
        let mut copy = db.aliases();
        copy.insert("primary".into(), "test".into());
        assert!(db.aliases().is_empty());
    }

    #[test]
    fn test_default_policy_per_kind() {
        assert_eq!(
            postgres("postgres://localhost/test").close_policy(),
            ClosePolicy::Strict
        );
        assert_eq!(mariadb().close_policy(), ClosePolicy::Lenient);
        assert_eq!(
            mariadb().with_close_policy(ClosePolicy::Strict).close_policy(),
            ClosePolicy::Strict
        );
    }

    #[test]
    fn test_passthrough_settings() {
        let db = mariadb();
        db.set_login_timeout(Duration::from_secs(7));
        db.set_log_settings(LogSettings::disabled());
        let vendor = db
            .resolve(Capability::VendorDataSource(DatabaseType::MariaDB))
            .unwrap();
        let vendor = vendor.as_mariadb_data_source().unwrap();
        assert_eq!(vendor.login_timeout(), Duration::from_secs(7));
        assert_eq!(vendor.log_settings(), LogSettings::disabled());
    }

    #[tokio::test]
    async fn test_close_runs_callbacks_once_then_noop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let db = EmbeddedDatabase::new(
            PgDataSource::from_url("postgres://localhost/test").unwrap(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        db.close().await.unwrap();
        db.close().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(db.is_closed());
        assert!(db.info().closed);
    }

    #[tokio::test]
    async fn test_strict_close_surfaces_release_failure() {
        let db = EmbeddedDatabase::new(
            PgDataSource::from_url("postgres://localhost/test").unwrap(),
            || async { Err(DbError::internal("drop database failed")) },
        );
        let err = db.close().await.unwrap_err();
        assert!(matches!(err, DbError::ReleaseFailed { .. }));
        assert!(err.to_string().contains("drop database failed"));
        assert!(db.is_closed());
    }

    #[tokio::test]
    async fn test_lenient_close_swallows_failures() {
        let ran = Arc::new(AtomicUsize::new(0));
        let db = mariadb();
        db.register_close_callback(|| async { Err(DbError::internal("pool refused")) })
            .unwrap();
        let counter = Arc::clone(&ran);
        db.register_close_callback(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

        db.close().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_connections_and_registration() {
        let db = mariadb();
        db.close().await.unwrap();

        let err = db.connection().await.unwrap_err();
        assert!(matches!(err, DbError::Closed { .. }));
        let err = db
            .connection_with_credentials("admin", "secret")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Closed { .. }));
        assert!(db.register_close_callback(|| async { Ok(()) }).is_err());
    }

    #[tokio::test]
    async fn test_registration_during_close_is_refused() {
        let registry = CloseRegistry::new();
        let db = Arc::new(EmbeddedDatabase::with_registry(
            PgDataSource::from_url("postgres://localhost/test").unwrap(),
            registry.clone(),
        ));

        // Bypasses the handle's closed flag and races the seal directly
        let attempt = Arc::new(std::sync::Mutex::new(None));
        let seen = Arc::clone(&attempt);
        let late = registry.clone();
        registry.register(move || {
            let late = late.clone();
            let seen = Arc::clone(&seen);
            async move {
                *seen.lock().unwrap() = Some(late.try_register(|| async { Ok(()) }));
                Ok(())
            }
        });

        db.close().await.unwrap();
        assert_eq!(*attempt.lock().unwrap(), Some(false));
        assert_eq!(registry.len(), 1);
        let err = db.register_close_callback(|| async { Ok(()) }).unwrap_err();
        assert!(matches!(err, DbError::Closed { .. }));
    }

    #[test]
    fn test_info_snapshot() {
        let db = mariadb();
        db.register_close_callback(|| async { Ok(()) }).unwrap();
        let info = db.info();
        assert_eq!(info.id, "test");
        assert_eq!(info.database_type, DatabaseType::MariaDB);
        assert_eq!(info.database.as_deref(), Some("test"));
        assert_eq!(info.close_callbacks, 2);
        assert!(!info.closed);
    }
}
