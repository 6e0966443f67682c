use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:5000,\
http://localhost:8080,http://127.0.0.1:5500,http://localhost:8000";

const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "JWT_SECRET",
                reason: "must not be empty".into(),
            });
        }

        let token_ttl_hours: i64 = try_load("TOKEN_TTL_HOURS", "24")?;
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&token_ttl_hours) {
            return Err(ConfigError::Invalid {
                key: "TOKEN_TTL_HOURS",
                reason: format!("must be between 1 and {MAX_TOKEN_TTL_HOURS}"),
            });
        }

        let raw_origins: String = try_load("CORS_ORIGINS", DEFAULT_CORS_ORIGINS)?;
        let cors_origins = parse_origins(&raw_origins)?;

        Ok(Self {
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:3000")?,
            database_url: try_load("DATABASE_URL", "sqlite://polls.db?mode=rwc")?,
            db_max_connections: try_load("DB_MAX_CONNECTIONS", "5")?,
            db_acquire_timeout: Duration::from_secs(try_load("DB_ACQUIRE_TIMEOUT_SECS", "5")?),
            jwt_secret,
            token_ttl_hours,
            cors_origins,
        })
    }
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }
    })
}

/// Splits a comma-separated origin list. Credentials are allowed, so `*` is not.
fn parse_origins(raw: &str) -> Result<Vec<String>, ConfigError> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if origins.iter().any(|origin| origin == "*") {
        return Err(ConfigError::Invalid {
            key: "CORS_ORIGINS",
            reason: "wildcard origin `*` cannot be combined with credentials".into(),
        });
    }
    Ok(origins)
}
