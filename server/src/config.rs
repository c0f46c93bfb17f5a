use std::{env, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub dispatch_batch_size: i64,
    /// Zero disables the in-process dispatch ticker.
    pub dispatch_interval: Duration,
    pub dispatch_claim_timeout: Duration,
    pub provider_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            port: parse_or(&lookup, "PORT", 4000)?,
            database_url: resolve_database_url(&lookup),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            dispatch_batch_size: positive(&lookup, "DISPATCH_BATCH_SIZE", 50)?,
            dispatch_interval: Duration::from_secs(parse_or(
                &lookup,
                "DISPATCH_INTERVAL_SECS",
                0,
            )?),
            dispatch_claim_timeout: Duration::from_secs(positive(
                &lookup,
                "DISPATCH_CLAIM_TIMEOUT_SECS",
                300,
            )?),
            provider_timeout: Duration::from_secs(positive(
                &lookup,
                "PROVIDER_TIMEOUT_SECS",
                30,
            )?),
        };
        // A claim is renewed before each send, so it must outlive one provider call.
        if config.dispatch_claim_timeout <= config.provider_timeout {
            return Err(ConfigError::Invalid {
                key: "DISPATCH_CLAIM_TIMEOUT_SECS",
                value: config.dispatch_claim_timeout.as_secs().to_string(),
                reason: format!(
                    "must be greater than PROVIDER_TIMEOUT_SECS ({})",
                    config.provider_timeout.as_secs()
                ),
            });
        }
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            database_url: String::new(),
            db_max_connections: 10,
            dispatch_batch_size: 50,
            dispatch_interval: Duration::ZERO,
            dispatch_claim_timeout: Duration::from_secs(300),
            provider_timeout: Duration::from_secs(30),
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn positive<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default + ToString,
    T::Err: std::fmt::Display,
{
    let value = parse_or(lookup, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn resolve_database_url<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = non_empty(lookup, "DATABASE_URL") {
        return url;
    }
    let pick = |primary: &str, fallback: &str, default: &str| {
        non_empty(lookup, primary)
            .or_else(|| non_empty(lookup, fallback))
            .unwrap_or_else(|| default.to_string())
    };
    let host = pick("POSTGRES_HOST", "PGHOST", "localhost");
    let port = pick("POSTGRES_PORT", "PGPORT", "5432");
    let user = pick("POSTGRES_USER", "PGUSER", "postgres");
    let password = pick("POSTGRES_PASSWORD", "PGPASSWORD", "postgres");
    let db = pick("POSTGRES_DB", "PGDATABASE", "crm_messaging");
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}
