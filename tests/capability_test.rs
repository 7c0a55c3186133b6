//! Integration tests for capability resolution and connection URLs.

use embedded_db_handle::db::{
    BackingSource, EmbeddedDatabase, MariaDbDataSource, PgDataSource, Resolved, Wrapper, capability,
};
use embedded_db_handle::{Capability, DataSource, DataSourceConfig, DatabaseType, DbError};

fn handles() -> Vec<EmbeddedDatabase> {
    vec![
        EmbeddedDatabase::new(
            PgDataSource::from_url("postgres://admin:pw@localhost:5432/test").unwrap(),
            || async { Ok(()) },
        ),
        EmbeddedDatabase::new(
            MariaDbDataSource::new("localhost", 3306, "test").with_user("admin"),
            || async { Ok(()) },
        ),
    ]
}

/// A test-side facade that only reports itself as a data source.
struct Recorder {
    inner: BackingSource,
}

impl Wrapper for Recorder {
    fn adapt(&self, capability: Capability) -> Option<Resolved<'_>> {
        match capability {
            Capability::DataSource => Some(Resolved::DataSource(&self.inner)),
            _ => None,
        }
    }

    fn resolve(&self, capability: Capability) -> embedded_db_handle::DbResult<Resolved<'_>> {
        capability::resolve(self, &self.inner, capability)
    }

    fn supports(&self, capability: Capability) -> bool {
        capability::supports(self, &self.inner, capability)
    }
}

#[test]
fn test_supports_agrees_with_resolve_for_every_capability() {
    for db in handles() {
        for cap in Capability::all() {
            assert_eq!(
                db.supports(cap),
                db.resolve(cap).is_ok(),
                "{} handle disagrees on {}",
                db.database_type(),
                cap
            );
        }
    }
}

#[test]
fn test_handle_satisfies_embedded_capabilities_itself() {
    for db in handles() {
        let own = db.resolve(Capability::EmbeddedDatabase).unwrap();
        assert!(std::ptr::eq(own.as_embedded_database().unwrap(), &db));

        let typed = db
            .resolve(Capability::EmbeddedDatabaseOf(db.database_type()))
            .unwrap();
        assert!(std::ptr::eq(typed.as_embedded_database().unwrap(), &db));
    }
}

#[test]
fn test_vendor_capabilities_reach_backing_source() {
    let [pg, maria]: [EmbeddedDatabase; 2] = handles().try_into().unwrap();

    assert!(pg.supports(Capability::VendorDataSource(DatabaseType::PostgreSQL)));
    assert!(!pg.supports(Capability::VendorDataSource(DatabaseType::MariaDB)));
    let options = pg
        .resolve(Capability::ConnectOptions(DatabaseType::PostgreSQL))
        .unwrap();
    assert_eq!(options.as_pg_connect_options().unwrap().get_username(), "admin");

    let vendor = maria
        .resolve(Capability::VendorDataSource(DatabaseType::MariaDB))
        .unwrap();
    assert_eq!(vendor.as_mariadb_data_source().unwrap().username(), "admin");
    assert!(maria.supports(Capability::ConnectOptions(DatabaseType::MariaDB)));
    assert!(!maria.supports(Capability::EmbeddedDatabaseOf(DatabaseType::PostgreSQL)));
}

#[test]
fn test_unsupported_capability_names_the_request() {
    let [pg, _]: [EmbeddedDatabase; 2] = handles().try_into().unwrap();
    let err = pg
        .resolve(Capability::ConnectOptions(DatabaseType::MariaDB))
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::UnsupportedCapability {
            capability: Capability::ConnectOptions(DatabaseType::MariaDB)
        }
    ));
    assert!(err.to_string().contains("MariaDB connect options"));
}

#[test]
fn test_outer_facade_wins_ties() {
    let recorder = Recorder {
        inner: PgDataSource::from_url("postgres://localhost:5432/test")
            .unwrap()
            .into(),
    };

    // DataSource is satisfied by the facade's own adapt, not by delegation
    assert!(recorder.supports(Capability::DataSource));
    assert!(recorder.supports(Capability::VendorDataSource(DatabaseType::PostgreSQL)));
    assert!(recorder.supports(Capability::ConnectOptions(DatabaseType::PostgreSQL)));
    assert!(!recorder.supports(Capability::EmbeddedDatabase));
    for cap in Capability::all() {
        assert_eq!(recorder.supports(cap), recorder.resolve(cap).is_ok());
    }
}

#[test]
fn test_postgres_url_is_verbatim() {
    let url = "postgresql://admin:pw@localhost:5432/test?sslmode=disable";
    let db = EmbeddedDatabase::new(PgDataSource::from_url(url).unwrap(), || async { Ok(()) });
    assert_eq!(db.url(), url);
    assert_eq!(db.username(), "admin");
    assert_eq!(db.password(), Some("pw"));
}

#[test]
fn test_mariadb_url_is_reconstructed() {
    let with_password = MariaDbDataSource::new("localhost", 5432, "test")
        .with_user("admin")
        .with_password("x");
    assert_eq!(
        with_password.url(),
        "mariadb://localhost:5432/test?user=admin&password=x"
    );

    let blank = MariaDbDataSource::new("localhost", 5432, "test")
        .with_user("admin")
        .with_password("   ");
    assert_eq!(blank.url(), "mariadb://localhost:5432/test?user=admin");

    let none = MariaDbDataSource::new("localhost", 5432, "test").with_user("admin");
    assert_eq!(none.url(), "mariadb://localhost:5432/test?user=admin");
}

#[test]
fn test_config_builds_equivalent_mariadb_source() {
    let config = DataSourceConfig::parse("mysql://admin:x@localhost:5432/test?login_timeout=3").unwrap();
    let source = config.build().unwrap();
    assert_eq!(source.database_type(), DatabaseType::MariaDB);
    assert_eq!(source.url(), "mariadb://localhost:5432/test?user=admin&password=x");
    assert_eq!(source.login_timeout().as_secs(), 3);
}
