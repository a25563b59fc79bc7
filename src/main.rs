//! Quire - a self-hosted blog

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quire::{
    api::{self, AppState},
    cache::{create_cache, TaggedCache},
    config::Config,
    db,
};

const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

fn config_path() -> PathBuf {
    std::env::var_os("QUIRE_CONFIG")
        .map(PathBuf::from)
        .or_else(|| std::env::args_os().nth(1).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.yml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quire=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Quire {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let path = config_path();
    let config = Config::load_with_env(&path)?;
    config.validate()?;
    tracing::info!("Configuration loaded from {}", path.display());

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Initialize cache
    let cache = create_cache(&config.cache).await;
    tracing::info!("Cache initialized: {}", cache.backend_name());
    let cache = Arc::new(TaggedCache::new(cache, config.cache.ttl()));

    tokio::fs::create_dir_all(&config.upload.path)
        .await
        .with_context(|| format!("Failed to create upload directory {}", config.upload.path.display()))?;

    let state = AppState::new(pool, cache, &config)?;

    // Prune the login rate limiter
    {
        let users = state.users.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                users.limiter().cleanup().await;
            }
        });
    }

    // Drop expired sessions
    {
        let users = state.users.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                match users.purge_expired_sessions().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Purged {} expired sessions", n),
                    Err(e) => tracing::warn!("Session purge failed: {}", e),
                }
            }
        });
    }

    let app = api::build_router(state, &config.server.cors_origin, &config.upload.path);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
