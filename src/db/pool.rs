//! Database connection pool
//!
//! [`Database`] owns either a SQLite or a MySQL pool and is shared as a
//! [`DynDatabasePool`]. Repositories borrow the concrete pool through
//! [`DatabasePool::backend`].

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlPool, MySqlPoolOptions},
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};

use crate::config::{DatabaseConfig, DatabaseDriver};

const SQLITE_MAX_CONNECTIONS: u32 = 20;
const MYSQL_MAX_CONNECTIONS: u32 = 30;

#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Run a statement that returns no rows; yields the affected row count
    async fn execute(&self, query: &str) -> Result<u64>;

    async fn ping(&self) -> Result<()>;

    async fn close(&self);

    fn driver(&self) -> DatabaseDriver;

    /// Borrow the concrete pool for driver-specific queries
    fn backend(&self) -> Backend<'_>;
}

/// Borrowed concrete pool, matched on by repositories
#[derive(Debug, Clone, Copy)]
pub enum Backend<'a> {
    Sqlite(&'a SqlitePool),
    Mysql(&'a MySqlPool),
}

pub type DynDatabasePool = Arc<dyn DatabasePool>;

/// An open pool for one of the supported drivers
pub enum Database {
    Sqlite(SqlitePool),
    Mysql(MySqlPool),
}

impl Database {
    /// Open a SQLite database. `:memory:` and `sqlite::memory:` give a private
    /// in-memory database on a single pinned connection; file paths are
    /// created along with their parent directories.
    pub async fn sqlite(url: &str) -> Result<Self> {
        let in_memory = matches!(url, ":memory:" | "sqlite::memory:" | "sqlite://:memory:");

        let (options, pool_options) = if in_memory {
            // Every connection to :memory: is a separate database
            (
                SqliteConnectOptions::from_str("sqlite::memory:")?,
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None),
            )
        } else {
            let path = url
                .strip_prefix("sqlite://")
                .or_else(|| url.strip_prefix("sqlite:"))
                .unwrap_or(url);
            let path = path.split('?').next().unwrap_or(path);
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
            (
                SqliteConnectOptions::new().filename(path).create_if_missing(true),
                SqlitePoolOptions::new().max_connections(SQLITE_MAX_CONNECTIONS),
            )
        };

        let pool = pool_options
            .connect_with(options.foreign_keys(true))
            .await
            .with_context(|| format!("Failed to open SQLite database {}", url))?;
        Ok(Database::Sqlite(pool))
    }

    pub async fn mysql(url: &str) -> Result<Self> {
        let url = if url.starts_with("mysql://") {
            url.to_string()
        } else {
            format!("mysql://{}", url)
        };
        let pool = MySqlPoolOptions::new()
            .max_connections(MYSQL_MAX_CONNECTIONS)
            .connect(&url)
            .await
            .context("Failed to connect to MySQL")?;
        Ok(Database::Mysql(pool))
    }
}

#[async_trait]
impl DatabasePool for Database {
    async fn execute(&self, query: &str) -> Result<u64> {
        let affected = match self {
            Database::Sqlite(p) => sqlx::query(query).execute(p).await?.rows_affected(),
            Database::Mysql(p) => sqlx::query(query).execute(p).await?.rows_affected(),
        };
        Ok(affected)
    }

    async fn ping(&self) -> Result<()> {
        match self {
            Database::Sqlite(p) => sqlx::query("SELECT 1").execute(p).await.map(drop),
            Database::Mysql(p) => sqlx::query("SELECT 1").execute(p).await.map(drop),
        }
        .context("Database ping failed")
    }

    async fn close(&self) {
        match self {
            Database::Sqlite(p) => p.close().await,
            Database::Mysql(p) => p.close().await,
        }
    }

    fn driver(&self) -> DatabaseDriver {
        match self {
            Database::Sqlite(_) => DatabaseDriver::Sqlite,
            Database::Mysql(_) => DatabaseDriver::Mysql,
        }
    }

    fn backend(&self) -> Backend<'_> {
        match self {
            Database::Sqlite(p) => Backend::Sqlite(p),
            Database::Mysql(p) => Backend::Mysql(p),
        }
    }
}

/// Open the pool described by `config`
pub async fn create_pool(config: &DatabaseConfig) -> Result<DynDatabasePool> {
    let db = match config.driver {
        DatabaseDriver::Sqlite => Database::sqlite(&config.url).await?,
        DatabaseDriver::Mysql => Database::mysql(&config.url).await?,
    };
    Ok(Arc::new(db))
}

/// Fresh in-memory SQLite database
pub async fn create_test_pool() -> Result<DynDatabasePool> {
    Ok(Arc::new(Database::sqlite(":memory:").await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_is_sqlite() {
        let pool = create_test_pool().await.unwrap();
        assert_eq!(pool.driver(), DatabaseDriver::Sqlite);
        assert!(matches!(pool.backend(), Backend::Sqlite(_)));
        pool.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_pool_keeps_state_across_queries() {
        let pool = create_test_pool().await.unwrap();
        pool.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            pool.execute("INSERT INTO t (name) VALUES ('a')"),
            pool.execute("INSERT INTO t (name) VALUES ('b')"),
        );
        assert_eq!(a.unwrap() + b.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let pool = create_test_pool().await.unwrap();
        pool.execute("CREATE TABLE parent (id INTEGER PRIMARY KEY)").await.unwrap();
        pool.execute("CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id))")
            .await
            .unwrap();

        assert!(pool.execute("INSERT INTO child (parent_id) VALUES (42)").await.is_err());
    }

    #[tokio::test]
    async fn test_file_pool_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("nested").join("quire.db");
        let config = DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url: db_path.to_string_lossy().to_string(),
        };

        let pool = create_pool(&config).await.unwrap();
        pool.ping().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_sqlite_url_prefix_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("prefixed.db");
        let config = DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url: format!("sqlite:{}", db_path.display()),
        };

        create_pool(&config).await.unwrap().ping().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    #[ignore = "needs MYSQL_TEST_URL"]
    async fn test_mysql_pool() {
        let Ok(url) = std::env::var("MYSQL_TEST_URL") else {
            return;
        };
        let config = DatabaseConfig {
            driver: DatabaseDriver::Mysql,
            url,
        };
        let pool = create_pool(&config).await.unwrap();
        assert_eq!(pool.driver(), DatabaseDriver::Mysql);
        pool.ping().await.unwrap();
    }
}
