//! Connection-related data models.
//!
//! This module defines the backend kinds, teardown policies and handle snapshots
//! shared by the data sources and the managed handle.

use chrono::{DateTime, Utc};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MySQL servers speaking the same protocol
    MariaDB,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mariadb://") || lower.starts_with("mysql://") {
            Some(Self::MariaDB)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MariaDB => "MariaDB",
        }
    }

    /// URL scheme used when a connection URL has to be composed.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::MariaDB => "mariadb",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::PostgreSQL => 5432,
            Self::MariaDB => 3306,
        }
    }

    /// Teardown policy used by handles of this kind unless overridden.
    ///
    /// PostgreSQL handles are released by a single provisioning owner, so a
    /// failure is surfaced. MariaDB handles are shared with pool decorators and
    /// keep releasing after a failing owner.
    pub fn default_close_policy(&self) -> ClosePolicy {
        match self {
            Self::PostgreSQL => ClosePolicy::Strict,
            Self::MariaDB => ClosePolicy::Lenient,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// How a close registry reacts to a failing teardown callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosePolicy {
    /// Abort on the first failure and report it to the caller of `close`.
    Strict,
    /// Log the failure and keep running the remaining callbacks.
    Lenient,
}

impl ClosePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("strict") {
            Some(Self::Strict)
        } else if value.eq_ignore_ascii_case("lenient") {
            Some(Self::Lenient)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ClosePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Lenient => write!(f, "lenient"),
        }
    }
}

/// Statement logging applied to every connection a data source opens.
///
/// This is the log sink of a data source: sqlx reports executed statements
/// through the `log` facade at `statements`, and statements slower than
/// `slow_threshold` at `slow_statements`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub statements: LevelFilter,
    pub slow_statements: LevelFilter,
    pub slow_threshold: Duration,
}

impl LogSettings {
    /// Disable statement logging entirely.
    pub fn disabled() -> Self {
        Self {
            statements: LevelFilter::Off,
            slow_statements: LevelFilter::Off,
            slow_threshold: Duration::from_secs(1),
        }
    }
}

impl Default for LogSettings {
    /// Mirrors sqlx's own connection defaults.
    fn default() -> Self {
        Self {
            statements: LevelFilter::Debug,
            slow_statements: LevelFilter::Warn,
            slow_threshold: Duration::from_secs(1),
        }
    }
}

/// Snapshot of a managed handle, safe to log (no credentials).
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub id: String,
    pub database_type: DatabaseType,
    /// Database name targeted by the backing data source
    pub database: Option<String>,
    pub close_policy: ClosePolicy,
    pub close_callbacks: usize,
    pub created_at: DateTime<Utc>,
    pub closed: bool,
}
