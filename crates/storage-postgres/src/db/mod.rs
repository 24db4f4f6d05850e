//! Connection pooling, migrations and the single writer.

pub mod write_actor;

pub use write_actor::{spawn_writer, WriteHandle};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

use crate::errors::{IntoCore, StorageError};
use finpipe_core::Result;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Where the durable store lives.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl PostgresTarget {
    /// libpq key/value connection string. Values are single-quoted with
    /// backslash escapes, so passwords need no URL encoding.
    pub fn conninfo(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            quote_value(&self.host),
            self.port,
            quote_value(&self.database),
            quote_value(&self.user),
            quote_value(&self.password),
        )
    }
}

impl fmt::Debug for PostgresTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn quote_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Build a connection pool. Connections are opened lazily, so this succeeds
/// even while the database is down.
pub fn create_pool(target: &PostgresTarget, max_size: u32) -> Result<Arc<DbPool>> {
    let manager = ConnectionManager::<PgConnection>::new(target.conninfo());
    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .min_idle(Some(0))
        .connection_timeout(Duration::from_secs(10))
        .test_on_check_out(true)
        .build_unchecked(manager);
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    pool.get().into_core()
}

/// Apply pending embedded migrations. Returns the versions applied.
pub fn run_migrations(pool: &DbPool) -> Result<Vec<String>> {
    let mut conn = get_connection(pool)?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

    let versions: Vec<String> = applied.iter().map(|v| v.to_string()).collect();
    if versions.is_empty() {
        info!("Database schema is up to date");
    } else {
        info!("Applied migrations: {}", versions.join(", "));
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(password: &str) -> PostgresTarget {
        PostgresTarget {
            host: "db".to_string(),
            port: 5432,
            database: "market".to_string(),
            user: "finpipe".to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_conninfo_quotes_values() {
        assert_eq!(
            target("s3cret").conninfo(),
            "host='db' port=5432 dbname='market' user='finpipe' password='s3cret'"
        );
        assert!(target(r"it's\x").conninfo().ends_with(r"password='it\'s\\x'"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let shown = format!("{:?}", target("s3cret"));
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn test_pool_builds_without_a_server() {
        let pool = create_pool(&target("x"), 4).unwrap();
        assert_eq!(pool.max_size(), 4);
    }
}
