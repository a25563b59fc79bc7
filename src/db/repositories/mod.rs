//! Database repositories
//!
//! One repository per entity: an async trait describing the data access the
//! services need, and an `Sqlx*Repository` implementing it on top of the
//! shared [`DynDatabasePool`](crate::db::DynDatabasePool).
//!
//! Almost every query is written in the subset of SQL understood by both
//! SQLite and MySQL, so the driver dispatch is done once by [`with_pool!`]
//! and row decoding goes through [`DbRow`], which both row types implement.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

/// Run the same sqlx code against whichever pool backs the repository.
///
/// The body is expanded once per backend, with `$p` bound to the concrete
/// `&SqlitePool` or `&MySqlPool`.
macro_rules! with_pool {
    ($pool:expr, |$p:ident| $body:expr) => {
        match $crate::db::DatabasePool::backend(&*$pool) {
            $crate::db::Backend::Sqlite($p) => $body,
            $crate::db::Backend::Mysql($p) => $body,
        }
    };
}

pub mod backup;
pub mod comment;
pub mod media;
pub mod nav_item;
pub mod post;
pub mod session;
pub mod settings;
pub mod tag;
pub mod user;
pub mod whitelist;

pub use backup::{BackupRepository, SqlxBackupRepository};
pub use comment::{CommentRepository, SqlxCommentRepository};
pub use media::{MediaRepository, SqlxMediaRepository};
pub use nav_item::{build_nav_tree, NavItemRepository, SqlxNavItemRepository};
pub use post::{PostRepository, SqlxPostRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use settings::{SettingsRepository, SqlxSettingsRepository};
pub use tag::{SqlxTagRepository, TagRepository};
pub use user::{SqlxUserRepository, UserRepository};
pub use whitelist::{SqlxWhitelistRepository, WhitelistRepository};

/// Typed column access shared by SQLite and MySQL rows
pub(crate) trait DbRow {
    fn get_i64(&self, col: &str) -> Result<i64>;
    fn get_opt_i64(&self, col: &str) -> Result<Option<i64>>;
    fn get_i32(&self, col: &str) -> Result<i32>;
    fn get_string(&self, col: &str) -> Result<String>;
    fn get_opt_string(&self, col: &str) -> Result<Option<String>>;
    fn get_bool(&self, col: &str) -> Result<bool>;
    fn get_f64(&self, col: &str) -> Result<f64>;
    fn get_opt_f64(&self, col: &str) -> Result<Option<f64>>;
    fn get_datetime(&self, col: &str) -> Result<DateTime<Utc>>;
    fn get_opt_datetime(&self, col: &str) -> Result<Option<DateTime<Utc>>>;
}

macro_rules! impl_db_row {
    ($row:ty) => {
        impl DbRow for $row {
            fn get_i64(&self, col: &str) -> Result<i64> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
            fn get_opt_i64(&self, col: &str) -> Result<Option<i64>> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
            fn get_i32(&self, col: &str) -> Result<i32> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
            fn get_string(&self, col: &str) -> Result<String> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
            fn get_opt_string(&self, col: &str) -> Result<Option<String>> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
            fn get_bool(&self, col: &str) -> Result<bool> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
            fn get_f64(&self, col: &str) -> Result<f64> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
            fn get_opt_f64(&self, col: &str) -> Result<Option<f64>> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
            fn get_datetime(&self, col: &str) -> Result<DateTime<Utc>> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
            fn get_opt_datetime(&self, col: &str) -> Result<Option<DateTime<Utc>>> {
                self.try_get(col).with_context(|| format!("Failed to read column {}", col))
            }
        }
    };
}

impl_db_row!(sqlx::sqlite::SqliteRow);
impl_db_row!(sqlx::mysql::MySqlRow);

/// Auto-increment id of the row just inserted
pub(crate) trait InsertId {
    fn insert_id(&self) -> i64;
}

impl InsertId for sqlx::sqlite::SqliteQueryResult {
    fn insert_id(&self) -> i64 {
        self.last_insert_rowid()
    }
}

impl InsertId for sqlx::mysql::MySqlQueryResult {
    fn insert_id(&self) -> i64 {
        self.last_insert_id() as i64
    }
}

/// Whether an error came from a UNIQUE constraint
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| match e {
                sqlx::Error::Database(db) => Some(db.is_unique_violation()),
                _ => None,
            })
            .unwrap_or(false)
    })
}

/// `sqlx::query` with the database type pinned to that of `pool`, for
/// queries whose binds are added in a loop
pub(crate) fn query_on<'q, DB: sqlx::Database>(
    _pool: &sqlx::Pool<DB>,
    sql: &'q str,
) -> sqlx::query::Query<'q, DB, <DB as sqlx::database::HasArguments<'q>>::Arguments> {
    sqlx::query(sql)
}

/// Lower-cased LIKE pattern with wildcards escaped by `!`.
/// Queries using it must say `LIKE ? ESCAPE '!'`.
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .to_lowercase()
        .replace('!', "!!")
        .replace('%', "!%")
        .replace('_', "!_");
    format!("%{}%", escaped)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{User, UserRole};

    use super::{SqlxUserRepository, UserRepository};

    /// In-memory SQLite pool with every migration applied
    pub async fn migrated_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    /// Insert a user directly, bypassing password hashing
    pub async fn insert_user(pool: &DynDatabasePool, email: &str, role: UserRole) -> User {
        let repo = SqlxUserRepository::new(pool.clone());
        let user = User::new(email.to_string(), "Tester".to_string(), "hash".to_string(), role);
        repo.create(&user).await.expect("Failed to create user")
    }
}
