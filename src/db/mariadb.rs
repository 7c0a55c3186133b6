//! MariaDB data source.
//!
//! Configured from discrete fields (server, port, database, user, password).
//! It has no composed URL of its own, so [`MariaDbDataSource::url`] builds one:
//!
//! ```text
//! mariadb://HOST:PORT/DATABASE?user=USER[&password=PASSWORD]
//! ```
//!
//! The password clause is left out when the password is blank.

use crate::db::capability::{Capability, Resolved, Wrapper};
use crate::db::data_source::{DataSource, DbConnection, SettingsCell, with_login_timeout};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, LogSettings};
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use sqlx::ConnectOptions;
use sqlx::mysql::MySqlConnectOptions;
use std::time::Duration;
use tracing::debug;
use url::{Url, form_urlencoded};

pub struct MariaDbDataSource {
    server_name: String,
    port: u16,
    database_name: String,
    user: String,
    password: Option<String>,
    options: MySqlConnectOptions,
    settings: SettingsCell,
}

impl MariaDbDataSource {
    /// Create a data source for `database_name` on `server_name:port`, connecting as `root`.
    pub fn new(server_name: impl Into<String>, port: u16, database_name: impl Into<String>) -> Self {
        let mut source = Self {
            server_name: server_name.into(),
            port,
            database_name: database_name.into(),
            user: "root".to_string(),
            password: None,
            options: MySqlConnectOptions::new(),
            settings: SettingsCell::default(),
        };
        source.options = source.build_options();
        source
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self.options = self.build_options();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self.options = self.build_options();
        self
    }

    /// Create a data source from a `mariadb://` or `mysql://` URL.
    ///
    /// Credentials may appear either in the authority or as `user` / `password`
    /// query parameters, so URLs produced by [`MariaDbDataSource::url`] parse back.
    pub fn from_url(url: &str) -> DbResult<Self> {
        if DatabaseType::from_connection_string(url) != Some(DatabaseType::MariaDB) {
            return Err(DbError::invalid_input(
                "MariaDB URL must start with mariadb:// or mysql://",
            ));
        }
        let parsed = Url::parse(url).map_err(|e| DbError::invalid_input(format!("Invalid URL: {e}")))?;

        let server_name = parsed.host_str().unwrap_or("localhost");
        let port = parsed
            .port()
            .unwrap_or_else(|| DatabaseType::MariaDB.default_port());
        let database_name = parsed.path().trim_start_matches('/');
        if database_name.is_empty() {
            return Err(DbError::invalid_input(
                "MariaDB URL must name a database: mariadb://host:3306/database",
            ));
        }

        let decode = |raw: &str| percent_decode_str(raw).decode_utf8_lossy().into_owned();
        let mut user = (!parsed.username().is_empty()).then(|| decode(parsed.username()));
        let mut password = parsed.password().map(decode);
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "user" => user = Some(value.into_owned()),
                "password" => password = Some(value.into_owned()),
                _ => {}
            }
        }

        let mut source = Self::new(server_name, port, database_name);
        if let Some(user) = user {
            source = source.with_user(user);
        }
        if let Some(password) = password {
            source = source.with_password(password);
        }
        Ok(source)
    }

    /// Compose the connection URL from the discrete fields.
    pub fn url(&self) -> String {
        let mut url = format!(
            "{}://{}:{}/{}?user={}",
            DatabaseType::MariaDB.url_scheme(),
            self.server_name,
            self.port,
            self.database_name,
            encode_query_value(&self.user)
        );
        if let Some(password) = self.password.as_deref().filter(|p| !p.trim().is_empty()) {
            url.push_str("&password=");
            url.push_str(&encode_query_value(password));
        }
        url
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn database_name(&self) -> Option<&str> {
        Some(&self.database_name)
    }

    pub fn connect_options(&self) -> &MySqlConnectOptions {
        &self.options
    }

    /// Same server and credentials, different database.
    pub fn for_database(&self, database: &str) -> Self {
        let mut source = Self::new(&self.server_name, self.port, database).with_user(&self.user);
        if let Some(password) = &self.password {
            source = source.with_password(password);
        }
        source
    }

    fn build_options(&self) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&self.server_name)
            .port(self.port)
            .database(&self.database_name)
            .username(&self.user)
            .charset("utf8mb4");
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    /// Connect options with the current log settings applied.
    fn effective_options(&self) -> MySqlConnectOptions {
        let log = self.settings.get().log;
        self.options
            .clone()
            .log_statements(log.statements)
            .log_slow_statements(log.slow_statements, log.slow_threshold)
    }

    async fn connect(&self, options: MySqlConnectOptions) -> DbResult<DbConnection> {
        let timeout = self.settings.get().login_timeout;
        debug!(
            host = %self.server_name,
            port = self.port,
            database = %self.database_name,
            "Opening MariaDB connection"
        );
        let conn = with_login_timeout(timeout, options.connect()).await?;
        Ok(DbConnection::MySql(conn))
    }
}

fn encode_query_value(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

impl std::fmt::Debug for MariaDbDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MariaDbDataSource")
            .field("server_name", &self.server_name)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Wrapper for MariaDbDataSource {
    fn adapt(&self, capability: Capability) -> Option<Resolved<'_>> {
        match capability {
            Capability::DataSource => Some(Resolved::DataSource(self)),
            Capability::VendorDataSource(DatabaseType::MariaDB) => {
                Some(Resolved::MariaDbDataSource(self))
            }
            _ => None,
        }
    }

    fn resolve(&self, capability: Capability) -> DbResult<Resolved<'_>> {
        if let Some(resolved) = self.adapt(capability) {
            return Ok(resolved);
        }
        match capability {
            Capability::ConnectOptions(DatabaseType::MariaDB) => {
                Ok(Resolved::MySqlConnectOptions(&self.options))
            }
            _ => Err(DbError::unsupported_capability(capability)),
        }
    }
}

#[async_trait]
impl DataSource for MariaDbDataSource {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MariaDB
    }

    async fn connection(&self) -> DbResult<DbConnection> {
        self.connect(self.effective_options()).await
    }

    async fn connection_with_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> DbResult<DbConnection> {
        let options = self.effective_options().username(username).password(password);
        self.connect(options).await
    }

    fn log_settings(&self) -> LogSettings {
        self.settings.get().log
    }

    fn set_log_settings(&self, settings: LogSettings) {
        self.settings.update(|s| s.log = settings);
    }

    fn login_timeout(&self) -> Duration {
        self.settings.get().login_timeout
    }

    fn set_login_timeout(&self, timeout: Duration) {
        self.settings.update(|s| s.login_timeout = timeout);
    }
}
