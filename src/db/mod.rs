//! Database layer
//!
//! SQLite is the default for single-binary deployment; MySQL is available
//! for larger installations. The backend is chosen from configuration and
//! hidden behind the [`DatabasePool`] trait.
//!
//! ```ignore
//! use quire::config::DatabaseConfig;
//! use quire::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, Backend, Database, DatabasePool, DynDatabasePool};
