//! Database migrations
//!
//! Migrations are embedded as SQL strings, one dialect each for SQLite and
//! MySQL, and tracked in the `_migrations` table. Statements inside a
//! migration are separated by `;` and executed one at a time.
//!
//! Applied versions are never re-run, so a migration must not be edited
//! once released; add a new one instead.

use anyhow::{Context, Result};

use super::{Backend, DynDatabasePool};
use crate::config::DatabaseDriver;

/// One schema step, written once per dialect
#[derive(Debug, Clone)]
pub struct Migration {
    /// Sequential, starting at 1
    pub version: i32,
    pub name: &'static str,
    pub up_sqlite: &'static str,
    pub up_mysql: &'static str,
}

/// All migrations, in application order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'user',
                image VARCHAR(500),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'user',
                image VARCHAR(500),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
        "#,
    },
    Migration {
        version: 2,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token VARCHAR(128) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                ip_address VARCHAR(64),
                user_agent VARCHAR(500),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token VARCHAR(128) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                ip_address VARCHAR(64),
                user_agent VARCHAR(500),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_posts",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title VARCHAR(200) NOT NULL DEFAULT '',
                slug VARCHAR(200) NOT NULL UNIQUE,
                content TEXT NOT NULL,
                content_html TEXT NOT NULL,
                excerpt TEXT,
                cover_image VARCHAR(500),
                post_type VARCHAR(10) NOT NULL DEFAULT 'post',
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                pinned BOOLEAN NOT NULL DEFAULT 0,
                allow_comments BOOLEAN NOT NULL DEFAULT 1,
                view_count INTEGER NOT NULL DEFAULT 0,
                author_id INTEGER NOT NULL,
                published_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (author_id) REFERENCES users(id)
            );
            CREATE INDEX IF NOT EXISTS idx_posts_type_status ON posts(post_type, status);
            CREATE INDEX IF NOT EXISTS idx_posts_published_at ON posts(published_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                title VARCHAR(200) NOT NULL DEFAULT '',
                slug VARCHAR(200) NOT NULL UNIQUE,
                content MEDIUMTEXT NOT NULL,
                content_html MEDIUMTEXT NOT NULL,
                excerpt TEXT,
                cover_image VARCHAR(500),
                post_type VARCHAR(10) NOT NULL DEFAULT 'post',
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                pinned BOOLEAN NOT NULL DEFAULT FALSE,
                allow_comments BOOLEAN NOT NULL DEFAULT TRUE,
                view_count BIGINT NOT NULL DEFAULT 0,
                author_id BIGINT NOT NULL,
                published_at TIMESTAMP NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (author_id) REFERENCES users(id)
            );
            CREATE INDEX idx_posts_type_status ON posts(post_type, status);
            CREATE INDEX idx_posts_published_at ON posts(published_at);
        "#,
    },
    Migration {
        version: 4,
        name: "create_tags",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(50) NOT NULL UNIQUE,
                slug VARCHAR(100) NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS post_tags (
                post_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (post_id, tag_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_post_tags_tag_id ON post_tags(tag_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS tags (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(50) NOT NULL UNIQUE,
                slug VARCHAR(100) NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS post_tags (
                post_id BIGINT NOT NULL,
                tag_id BIGINT NOT NULL,
                PRIMARY KEY (post_id, tag_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_post_tags_tag_id ON post_tags(tag_id);
        "#,
    },
    Migration {
        version: 5,
        name: "create_comments",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id INTEGER NOT NULL,
                parent_id INTEGER,
                user_id INTEGER,
                guest_name VARCHAR(50),
                guest_email VARCHAR(255),
                content TEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                spam_score REAL,
                ip_address VARCHAR(64),
                user_agent VARCHAR(500),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES comments(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_post_status ON comments(post_id, status);
            CREATE INDEX IF NOT EXISTS idx_comments_parent_id ON comments(parent_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS comments (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                post_id BIGINT NOT NULL,
                parent_id BIGINT NULL,
                user_id BIGINT NULL,
                guest_name VARCHAR(50),
                guest_email VARCHAR(255),
                content TEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                spam_score DOUBLE NULL,
                ip_address VARCHAR(64),
                user_agent VARCHAR(500),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES comments(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX idx_comments_post_status ON comments(post_id, status);
            CREATE INDEX idx_comments_parent_id ON comments(parent_id);
        "#,
    },
    Migration {
        version: 6,
        name: "create_media",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS media (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename VARCHAR(255) NOT NULL,
                storage_key VARCHAR(500) NOT NULL,
                url VARCHAR(1000) NOT NULL,
                mime_type VARCHAR(100) NOT NULL,
                size INTEGER NOT NULL,
                storage VARCHAR(10) NOT NULL DEFAULT 'local',
                uploaded_by INTEGER,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (uploaded_by) REFERENCES users(id) ON DELETE SET NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS media (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                filename VARCHAR(255) NOT NULL,
                storage_key VARCHAR(500) NOT NULL,
                url VARCHAR(1000) NOT NULL,
                mime_type VARCHAR(100) NOT NULL,
                size BIGINT NOT NULL,
                storage VARCHAR(10) NOT NULL DEFAULT 'local',
                uploaded_by BIGINT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (uploaded_by) REFERENCES users(id) ON DELETE SET NULL
            );
        "#,
    },
    Migration {
        version: 7,
        name: "create_nav_items",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS nav_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER,
                title VARCHAR(50) NOT NULL,
                url VARCHAR(500) NOT NULL,
                open_new_tab BOOLEAN NOT NULL DEFAULT 0,
                sort_order INTEGER NOT NULL DEFAULT 0,
                visible BOOLEAN NOT NULL DEFAULT 1,
                FOREIGN KEY (parent_id) REFERENCES nav_items(id) ON DELETE CASCADE
            );
            INSERT INTO nav_items (title, url, sort_order) VALUES ('Home', '/', 0);
            INSERT INTO nav_items (title, url, sort_order) VALUES ('Memos', '/memos', 1);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS nav_items (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                parent_id BIGINT NULL,
                title VARCHAR(50) NOT NULL,
                url VARCHAR(500) NOT NULL,
                open_new_tab BOOLEAN NOT NULL DEFAULT FALSE,
                sort_order INT NOT NULL DEFAULT 0,
                visible BOOLEAN NOT NULL DEFAULT TRUE,
                FOREIGN KEY (parent_id) REFERENCES nav_items(id) ON DELETE CASCADE
            );
            INSERT INTO nav_items (title, url, sort_order) VALUES ('Home', '/', 0);
            INSERT INTO nav_items (title, url, sort_order) VALUES ('Memos', '/memos', 1);
        "#,
    },
    Migration {
        version: 8,
        name: "create_settings",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                site_name VARCHAR(100) NOT NULL DEFAULT 'Quire',
                site_description TEXT NOT NULL DEFAULT 'A personal blog',
                site_url VARCHAR(500),
                site_logo VARCHAR(500),
                site_favicon VARCHAR(500),
                footer_text TEXT,
                posts_per_page INTEGER NOT NULL DEFAULT 10,
                allow_registration BOOLEAN NOT NULL DEFAULT 0,
                comments_enabled BOOLEAN NOT NULL DEFAULT 1,
                comment_require_review BOOLEAN NOT NULL DEFAULT 1,
                notify_admin_on_comment BOOLEAN NOT NULL DEFAULT 0,
                notify_reply BOOLEAN NOT NULL DEFAULT 0,
                admin_email VARCHAR(255),
                smtp_host VARCHAR(255),
                smtp_port INTEGER NOT NULL DEFAULT 587,
                smtp_username VARCHAR(255),
                smtp_password TEXT,
                smtp_from VARCHAR(255),
                smtp_secure BOOLEAN NOT NULL DEFAULT 1,
                spam_detection_enabled BOOLEAN NOT NULL DEFAULT 0,
                spam_api_base VARCHAR(500),
                spam_api_key TEXT,
                spam_model VARCHAR(100),
                spam_low_threshold REAL NOT NULL DEFAULT 0.3,
                spam_high_threshold REAL NOT NULL DEFAULT 0.8,
                s3_enabled BOOLEAN NOT NULL DEFAULT 0,
                s3_endpoint VARCHAR(500),
                s3_region VARCHAR(50),
                s3_bucket VARCHAR(255),
                s3_access_key VARCHAR(255),
                s3_secret_key TEXT,
                s3_public_url VARCHAR(500),
                umami_enabled BOOLEAN NOT NULL DEFAULT 0,
                umami_url VARCHAR(500),
                umami_website_id VARCHAR(100),
                umami_api_key TEXT,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            INSERT OR IGNORE INTO settings (id) VALUES (1);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS settings (
                id INT PRIMARY KEY,
                site_name VARCHAR(100) NOT NULL DEFAULT 'Quire',
                site_description VARCHAR(500) NOT NULL DEFAULT 'A personal blog',
                site_url VARCHAR(500),
                site_logo VARCHAR(500),
                site_favicon VARCHAR(500),
                footer_text TEXT,
                posts_per_page INT NOT NULL DEFAULT 10,
                allow_registration BOOLEAN NOT NULL DEFAULT FALSE,
                comments_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                comment_require_review BOOLEAN NOT NULL DEFAULT TRUE,
                notify_admin_on_comment BOOLEAN NOT NULL DEFAULT FALSE,
                notify_reply BOOLEAN NOT NULL DEFAULT FALSE,
                admin_email VARCHAR(255),
                smtp_host VARCHAR(255),
                smtp_port INT NOT NULL DEFAULT 587,
                smtp_username VARCHAR(255),
                smtp_password TEXT,
                smtp_from VARCHAR(255),
                smtp_secure BOOLEAN NOT NULL DEFAULT TRUE,
                spam_detection_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                spam_api_base VARCHAR(500),
                spam_api_key TEXT,
                spam_model VARCHAR(100),
                spam_low_threshold DOUBLE NOT NULL DEFAULT 0.3,
                spam_high_threshold DOUBLE NOT NULL DEFAULT 0.8,
                s3_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                s3_endpoint VARCHAR(500),
                s3_region VARCHAR(50),
                s3_bucket VARCHAR(255),
                s3_access_key VARCHAR(255),
                s3_secret_key TEXT,
                s3_public_url VARCHAR(500),
                umami_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                umami_url VARCHAR(500),
                umami_website_id VARCHAR(100),
                umami_api_key TEXT,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            INSERT IGNORE INTO settings (id) VALUES (1);
        "#,
    },
    Migration {
        version: 9,
        name: "create_email_whitelist",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS email_whitelist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                note VARCHAR(200),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS email_whitelist (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                note VARCHAR(200),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
        "#,
    },
];

const TRACKING_TABLE_SQLITE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name VARCHAR(255) NOT NULL UNIQUE,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

const TRACKING_TABLE_MYSQL: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INT PRIMARY KEY,
    name VARCHAR(255) NOT NULL UNIQUE,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

impl Migration {
    fn sql_for(&self, driver: DatabaseDriver) -> &'static str {
        match driver {
            DatabaseDriver::Sqlite => self.up_sqlite,
            DatabaseDriver::Mysql => self.up_mysql,
        }
    }
}

/// Apply every migration not yet recorded in `_migrations`, in version
/// order. Returns how many were applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    let pending = pending(pool).await?;
    let driver = pool.driver();

    for migration in &pending {
        tracing::info!(version = migration.version, name = migration.name, "Applying migration");
        for statement in split_sql_statements(migration.sql_for(driver)) {
            pool.execute(statement)
                .await
                .with_context(|| format!("Migration {} failed at: {}", migration.name, preview(statement)))?;
        }
        record(pool, migration).await?;
    }

    if pending.is_empty() {
        tracing::debug!("No pending migrations");
    } else {
        tracing::info!("Applied {} migration(s)", pending.len());
    }
    Ok(pending.len())
}

pub async fn is_up_to_date(pool: &DynDatabasePool) -> Result<bool> {
    Ok(pending_count(pool).await? == 0)
}

pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    Ok(pending(pool).await?.len())
}

async fn pending(pool: &DynDatabasePool) -> Result<Vec<&'static Migration>> {
    let table = match pool.driver() {
        DatabaseDriver::Sqlite => TRACKING_TABLE_SQLITE,
        DatabaseDriver::Mysql => TRACKING_TABLE_MYSQL,
    };
    pool.execute(table).await.context("Failed to create _migrations")?;

    let applied = applied_versions(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect())
}

async fn applied_versions(pool: &DynDatabasePool) -> Result<Vec<i32>> {
    const SQL: &str = "SELECT version FROM _migrations ORDER BY version";
    let versions = match pool.backend() {
        Backend::Sqlite(p) => sqlx::query_scalar::<_, i32>(SQL).fetch_all(p).await,
        Backend::Mysql(p) => sqlx::query_scalar::<_, i32>(SQL).fetch_all(p).await,
    };
    versions.context("Failed to read applied migrations")
}

async fn record(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    const SQL: &str = "INSERT INTO _migrations (version, name) VALUES (?, ?)";
    let result = match pool.backend() {
        Backend::Sqlite(p) => sqlx::query(SQL)
            .bind(migration.version)
            .bind(migration.name)
            .execute(p)
            .await
            .map(drop),
        Backend::Mysql(p) => sqlx::query(SQL)
            .bind(migration.version)
            .bind(migration.name)
            .execute(p)
            .await
            .map(drop),
    };
    result.with_context(|| format!("Failed to record migration {}", migration.name))
}

/// First line of a statement, for error messages
fn preview(statement: &str) -> &str {
    statement.lines().next().unwrap_or(statement).trim()
}

/// Statements of a migration body. Fragments holding only `--` comments
/// are dropped.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| stmt.lines().any(|l| !l.trim().is_empty() && !l.trim().starts_with("--")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use sqlx::Row;

    async fn migrated_sqlite() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    #[tokio::test]
    async fn test_run_migrations_is_idempotent() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_is_up_to_date_and_pending_count() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        assert!(!is_up_to_date(&pool).await.expect("Failed to check"));
        assert_eq!(pending_count(&pool).await.expect("Failed to check"), MIGRATIONS.len());

        run_migrations(&pool).await.expect("Failed to run migrations");

        assert!(is_up_to_date(&pool).await.expect("Failed to check"));
        assert_eq!(pending_count(&pool).await.expect("Failed to check"), 0);
    }

    #[tokio::test]
    async fn test_settings_singleton_seeded() {
        let pool = migrated_sqlite().await;
        let Backend::Sqlite(sqlite) = pool.backend() else {
            panic!("test pool is SQLite");
        };

        let row = sqlx::query("SELECT COUNT(*) AS count, MAX(site_name) AS name FROM settings")
            .fetch_one(sqlite)
            .await
            .expect("Failed to query settings");
        let count: i64 = row.get("count");
        let name: String = row.get("name");
        assert_eq!(count, 1);
        assert_eq!(name, "Quire");

        let second = sqlx::query("INSERT INTO settings (id) VALUES (2)")
            .execute(sqlite)
            .await;
        assert!(second.is_err(), "only row id = 1 is allowed");
    }

    #[tokio::test]
    async fn test_post_tags_composite_key() {
        let pool = migrated_sqlite().await;
        let Backend::Sqlite(sqlite) = pool.backend() else {
            panic!("test pool is SQLite");
        };

        sqlx::query("INSERT INTO users (email, name, password_hash, role) VALUES ('a@b.c', 'A', 'h', 'admin')")
            .execute(sqlite)
            .await
            .unwrap();
        sqlx::query("INSERT INTO posts (slug, content, content_html, author_id) VALUES ('p', 'c', 'c', 1)")
            .execute(sqlite)
            .await
            .unwrap();
        sqlx::query("INSERT INTO tags (name, slug) VALUES ('Rust', 'rust')")
            .execute(sqlite)
            .await
            .unwrap();

        sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES (1, 1)")
            .execute(sqlite)
            .await
            .unwrap();
        let duplicate = sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES (1, 1)")
            .execute(sqlite)
            .await;
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (x INT);\n-- comment only;\nINSERT INTO a VALUES (1)";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[1].starts_with("INSERT"));
    }

    #[test]
    fn test_versions_are_sequential() {
        for (idx, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, idx + 1);
        }
    }
}
