use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use attendance_tracker_backend::auth::HeaderAuth;
use attendance_tracker_backend::config::Config;
use attendance_tracker_backend::domain::{ExportService, RateLimiter};
use attendance_tracker_backend::rest::{self, AppState};
use attendance_tracker_backend::storage::SqliteAttendanceStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    info!("Setting up database at {}", config.database_url);
    let store = SqliteAttendanceStore::connect(&config.database_url).await?;

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit_max_requests,
        config.rate_limit_window,
    ));

    // Periodic sweep reclaims memory for expired windows; checkLimit stays
    // correct without it.
    let sweeper = Arc::clone(&rate_limiter);
    let sweep_interval = config.rate_limit_sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let removed = sweeper.sweep();
            if removed > 0 {
                info!("rate limiter sweep removed {removed} expired records");
            }
        }
    });

    let export_service = ExportService::new(
        Arc::new(store),
        Arc::clone(&rate_limiter),
        config.export_limits,
        config.csv_export_enabled,
    );

    let state = AppState::new(export_service, rate_limiter, Arc::new(HeaderAuth));

    let cors = match &config.cors_allowed_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
    };

    let app = rest::router(state).layer(cors);

    info!("Starting server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
