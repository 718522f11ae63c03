//! Environment-driven configuration for the attendance backend.
//!
//! Every tunable has a default matching the production deployment; a set but
//! unparsable value is a startup error rather than a silent fallback.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Limits applied to one export request.
#[derive(Debug, Clone, Copy)]
pub struct ExportLimits {
    /// Pre-flight ceiling on the result set size
    pub max_records: u64,
    /// Inclusive ceiling on `end - start` in days
    pub max_date_range_days: i64,
    /// Page size for the fetch-and-stream loop
    pub batch_size: u32,
}

impl Default for ExportLimits {
    fn default() -> Self {
        Self {
            max_records: 50_000,
            max_date_range_days: 90,
            batch_size: 1_000,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    /// Origin allowed by the CORS layer; None allows any origin
    pub cors_allowed_origin: Option<String>,
    pub export_limits: ExportLimits,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_sweep_interval: Duration,
    /// FEATURE_CSV_EXPORT_ENABLED; export requests get 403 when off
    pub csv_export_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_url: "sqlite:attendance.db".to_string(),
            cors_allowed_origin: None,
            export_limits: ExportLimits::default(),
            rate_limit_max_requests: 10,
            rate_limit_window: Duration::from_secs(60 * 60),
            rate_limit_sweep_interval: Duration::from_secs(5 * 60),
            csv_export_enabled: true,
        }
    }
}

impl Config {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(raw) => raw
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid BIND_ADDR: {raw}"))?,
            Err(_) => defaults.bind_addr,
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);

        let cors_allowed_origin = std::env::var("CORS_ALLOWED_ORIGIN").ok();

        let export_limits = ExportLimits {
            max_records: env_parsed("MAX_EXPORT_RECORDS", defaults.export_limits.max_records)?,
            max_date_range_days: env_parsed(
                "MAX_DATE_RANGE_DAYS",
                defaults.export_limits.max_date_range_days,
            )?,
            batch_size: env_parsed("EXPORT_BATCH_SIZE", defaults.export_limits.batch_size)?,
        };

        let rate_limit_max_requests =
            env_parsed("RATE_LIMIT_MAX_REQUESTS", defaults.rate_limit_max_requests)?;
        let window_minutes: u64 = env_parsed("RATE_LIMIT_WINDOW_MINUTES", 60)?;
        let sweep_secs: u64 = env_parsed("RATE_LIMIT_SWEEP_INTERVAL_SECS", 300)?;

        // Mirrors the feature flag's historical semantics: anything but the
        // literal "false" leaves the export enabled.
        let csv_export_enabled = std::env::var("FEATURE_CSV_EXPORT_ENABLED")
            .map(|v| v != "false")
            .unwrap_or(true);

        Ok(Self {
            bind_addr,
            database_url,
            cors_allowed_origin,
            export_limits,
            rate_limit_max_requests,
            rate_limit_window: Duration::from_secs(window_minutes * 60),
            rate_limit_sweep_interval: Duration::from_secs(sweep_secs),
            csv_export_enabled,
        })
    }
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid {name}: {raw}")),
        Err(_) => Ok(default),
    }
}
