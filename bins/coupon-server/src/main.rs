//! coupon-server: Coupon Drop HTTP service.
//!
//! Hands out single-use coupon codes over `POST /api/claim`, at most one per
//! browser session and one per client address within their cooldown windows.
//! Admin routes under `/api/admin` manage the pool when a token is configured.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use coupon_core::{ClaimEngine, ClaimLedger, CouponPool, MemoryStore, PoolError};
use coupon_store::RocksStore;

mod admin;
mod config;
mod routes;
mod session;

use config::Config;

/// Shared application state passed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Claim engine over the configured pool and ledger.
    pub engine: Arc<ClaimEngine>,
    /// Server configuration.
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load coupon-server configuration")?;

    info!(
        bind = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        ephemeral = config.ephemeral,
        session_cooldown_secs = config.session_cooldown_secs,
        address_cooldown_secs = config.address_cooldown_secs,
        trust_proxy_headers = config.trust_proxy_headers,
        admin = config.admin_token.is_some(),
        "Starting coupon-server"
    );

    let (pool, ledger) = open_store(&config)?;
    seed_pool(pool.as_ref(), &config.seed_codes)?;

    let stats = pool.stats().context("Failed to read pool stats")?;
    info!(
        total = stats.total,
        available = stats.available,
        claimed = stats.claimed,
        "Coupon pool ready"
    );

    let engine = ClaimEngine::new(pool, ledger, config.engine_config());
    let state = AppState {
        engine: Arc::new(engine),
        config: Arc::new(config.clone()),
    };

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("Listening on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    info!("coupon-server stopped");
    Ok(())
}

/// Open the pool and ledger. Both are backed by the same store.
fn open_store(config: &Config) -> Result<(Arc<dyn CouponPool>, Arc<dyn ClaimLedger>)> {
    if config.ephemeral {
        warn!("COUPON_EPHEMERAL set: claims and coupons are lost on restart");
        let store = Arc::new(MemoryStore::new());
        let pool: Arc<dyn CouponPool> = store.clone();
        let ledger: Arc<dyn ClaimLedger> = store;
        return Ok((pool, ledger));
    }

    let path = config.db_path();
    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create data directory {}", path.display()))?;
    let store = RocksStore::open(&path)
        .with_context(|| format!("Failed to open coupon database at {}", path.display()))?;
    let store = Arc::new(store);
    let pool: Arc<dyn CouponPool> = store.clone();
    let ledger: Arc<dyn ClaimLedger> = store;
    Ok((pool, ledger))
}

/// Insert configured seed codes, skipping ones already present.
fn seed_pool(pool: &dyn CouponPool, codes: &[String]) -> Result<()> {
    let now = Utc::now();
    let mut added = 0usize;
    for code in codes {
        match pool.insert(code, now) {
            Ok(_) => added += 1,
            Err(PoolError::DuplicateCode(_)) => {}
            Err(PoolError::InvalidCode(reason)) => {
                warn!(code = %code, %reason, "Skipping invalid seed code");
            }
            Err(e) => return Err(e).context("Failed to seed coupon pool"),
        }
    }
    if added > 0 {
        info!(added, "Seeded coupon pool");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
