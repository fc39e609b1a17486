use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use roombook::api::{self, AppState};
use roombook::auth::AccessGate;
use roombook::checkout::CheckoutLinks;
use roombook::clock::{Clock, SystemClock};
use roombook::config::Config;
use roombook::engine::Engine;
use roombook::notify::{LogMailer, NotifyHub};
use roombook::rate_limit::RateLimiter;
use roombook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    roombook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let secret = match &config.jwt_secret {
        Some(s) => s.as_bytes().to_vec(),
        None => {
            warn!("ROOMBOOK_JWT_SECRET not set, using a random secret; tokens will not survive a restart");
            let mut bytes = vec![0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            bytes
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notify = Arc::new(NotifyHub::new(
        Arc::new(LogMailer),
        config.admin_emails.clone(),
    ));
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        notify,
        clock.clone(),
        CheckoutLinks::new(config.public_url.clone()),
    )?);

    if let Some(boot) = config.bootstrap_admin.clone() {
        match engine
            .bootstrap_admin(boot.username, boot.email, boot.password)
            .await
        {
            Ok(Some(admin)) => info!("bootstrapped admin {}", admin.username),
            Ok(None) => {}
            Err(e) => warn!("could not bootstrap admin: {e}"),
        }
    }
    if engine.store.admin_count() == 0 {
        warn!("no admin account exists; set ROOMBOOK_BOOTSTRAP_ADMIN=username:email:password");
    }

    let gate = Arc::new(AccessGate::new(&secret, config.token_ttl_secs, clock.clone()));
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit,
        config.rate_window_ms,
        clock,
    ));

    tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        Duration::from_secs(config.sweep_interval_secs.max(1)),
        config.retention_ms,
    ));
    tokio::spawn(sweeper::run_compactor(engine.clone(), config.compact_threshold));
    tokio::spawn(sweeper::run_limiter_pruner(
        limiter.clone(),
        Duration::from_millis(config.rate_window_ms.max(1000) as u64),
    ));

    let app = api::router(AppState {
        engine,
        gate,
        limiter,
    });

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("roombook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  public_url: {}", config.public_url);
    info!(
        "  rate limit: {} per {}s",
        config.rate_limit,
        config.rate_window_ms / 1000
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("roombook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM. A handler that fails to install is logged
/// and treated as never firing.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight requests");
}
