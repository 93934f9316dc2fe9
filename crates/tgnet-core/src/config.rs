use std::str::FromStr;

use crate::app_config::{AppConfig, Environment};
use crate::{AnalysisConfig, ConfigError};

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("TGNET_ENV", "development"))?;

    let bind_addr: SocketAddr = parse_value(&lookup, "TGNET_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("TGNET_LOG_LEVEL", "info");
    let channels_path = PathBuf::from(or_default("TGNET_CHANNELS_PATH", "./config/channels.yaml"));

    let db_max_connections = parse_value(&lookup, "TGNET_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_value(&lookup, "TGNET_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_value(&lookup, "TGNET_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let worker_concurrency: usize = parse_value(&lookup, "TGNET_WORKER_CONCURRENCY", "4")?;
    if worker_concurrency == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "TGNET_WORKER_CONCURRENCY".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let analysis_timeout_secs = parse_value(&lookup, "TGNET_ANALYSIS_TIMEOUT_SECS", "300")?;
    let prune_schedule = or_default("TGNET_PRUNE_SCHEDULE", "0 15 3 * * *");

    let defaults = AnalysisConfig::default();
    let analysis = AnalysisConfig {
        similarity_threshold: parse_value(
            &lookup,
            "TGNET_SIMILARITY_THRESHOLD",
            &defaults.similarity_threshold.to_string(),
        )?,
        duplicate_threshold: parse_value(
            &lookup,
            "TGNET_DUPLICATE_THRESHOLD",
            &defaults.duplicate_threshold.to_string(),
        )?,
        time_correlation_threshold: parse_value(
            &lookup,
            "TGNET_TIME_CORRELATION_THRESHOLD",
            &defaults.time_correlation_threshold.to_string(),
        )?,
        sync_delay_minutes: parse_value(
            &lookup,
            "TGNET_SYNC_DELAY_MINUTES",
            &defaults.sync_delay_minutes.to_string(),
        )?,
        staleness_days: parse_value(
            &lookup,
            "TGNET_STALENESS_DAYS",
            &defaults.staleness_days.to_string(),
        )?,
        rank_damping: parse_value(
            &lookup,
            "TGNET_RANK_DAMPING",
            &defaults.rank_damping.to_string(),
        )?,
        min_posts: parse_value(&lookup, "TGNET_MIN_POSTS", &defaults.min_posts.to_string())?,
        window_days: parse_value(
            &lookup,
            "TGNET_WINDOW_DAYS",
            &defaults.window_days.to_string(),
        )?,
        ..defaults
    };
    analysis.validate()?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        channels_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        worker_concurrency,
        analysis_timeout_secs,
        prune_schedule,
        analysis,
    })
}

fn parse_value<F, T>(lookup: &F, var: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(var).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` for unrecognized values.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "TGNET_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
