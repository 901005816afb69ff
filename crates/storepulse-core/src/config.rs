use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

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
/// Unlike [`load_app_config`], this does NOT load `.env` files — useful for testing
/// or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// This is the core parsing/validation logic, decoupled from the actual environment
/// so it can be tested with a pure `HashMap` lookup — no `set_var`/`remove_var` needed.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_i64 = |var: &str, default: &str| -> Result<i64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<i64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let database_url = require("DATABASE_URL")?;

    let env = parse_environment(&or_default("STOREPULSE_ENV", "development"))?;

    let bind_addr = parse_addr("STOREPULSE_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("STOREPULSE_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("STOREPULSE_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("STOREPULSE_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("STOREPULSE_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let magento_request_timeout_secs = parse_u64("STOREPULSE_MAGENTO_REQUEST_TIMEOUT_SECS", "30")?;
    let magento_user_agent = or_default(
        "STOREPULSE_MAGENTO_USER_AGENT",
        "storepulse/0.1 (retail-analytics)",
    );

    let sync_page_size = parse_i64("STOREPULSE_SYNC_PAGE_SIZE", "100")?;
    let sync_max_pages = parse_i64("STOREPULSE_SYNC_MAX_PAGES", "20")?;
    let sync_retention_days = match lookup("STOREPULSE_SYNC_RETENTION_DAYS") {
        Ok(raw) => Some(
            raw.parse::<i64>()
                .map_err(|e| ConfigError::InvalidEnvVar {
                    var: "STOREPULSE_SYNC_RETENTION_DAYS".to_string(),
                    reason: e.to_string(),
                })?,
        ),
        Err(_) => None,
    };
    let sync_schedule_cron = lookup("STOREPULSE_SYNC_SCHEDULE_CRON").ok();
    let sync_queue_depth = parse_usize("STOREPULSE_SYNC_QUEUE_DEPTH", "64")?;

    let db_write_max_retries = parse_u32("STOREPULSE_DB_WRITE_MAX_RETRIES", "3")?;
    let db_write_backoff_base_ms = parse_u64("STOREPULSE_DB_WRITE_BACKOFF_BASE_MS", "250")?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        magento_request_timeout_secs,
        magento_user_agent,
        sync_page_size,
        sync_max_pages,
        sync_retention_days,
        sync_schedule_cron,
        sync_queue_depth,
        db_write_max_retries,
        db_write_backoff_base_ms,
    })
}

fn parse_environment(raw: &str) -> Result<Environment, ConfigError> {
    match raw {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "STOREPULSE_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
