//! Process configuration, read from the environment.
//!
//! `.env` is loaded first when present. Unset and empty variables fall back
//! to their defaults; values that are set but unparsable are errors.

use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use finpipe_core::errors::{Error, Result};
use finpipe_core::quotes::MAX_SYMBOL_LEN;
use finpipe_storage_postgres::PostgresTarget;

pub const DEFAULT_SYMBOLS: &str = "AAPL,MSFT,GOOGL,AMZN,NVDA";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("json") {
            Ok(LogFormat::Json)
        } else if s.eq_ignore_ascii_case("text") {
            Ok(LogFormat::Text)
        } else {
            Err(Error::InvalidConfigValue(format!(
                "FINPIPE_LOG_FORMAT must be 'text' or 'json', got '{}'",
                s
            )))
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub redis_host: String,
    pub redis_port: u16,
    pub cache_key_prefix: String,
    pub run_lock_ttl: Duration,

    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_db: Option<String>,
    pub postgres_user: Option<String>,
    pub postgres_password: Option<String>,

    pub finnhub_api_key: Option<String>,
    pub symbols: Vec<String>,
    pub fetch_interval: Duration,
    pub requests_per_minute: u32,
    pub request_timeout: Duration,
    pub cycle_deadline: Duration,
    pub fetch_max_attempts: usize,

    pub transfer_at: NaiveTime,
    pub transfer_max_attempts: usize,
    pub analytics_enabled: bool,

    pub metrics_port: u16,
    pub log_format: LogFormat,
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env is the normal case in containers
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let fetch_interval_hours: u64 = parse_or(&get, "FETCH_INTERVAL_HOURS", 1)?;
        if fetch_interval_hours < 1 {
            return Err(Error::InvalidConfigValue(
                "FETCH_INTERVAL_HOURS must be at least 1".to_string(),
            ));
        }

        let symbols: Vec<String> = get("FETCH_SYMBOLS")
            .unwrap_or_else(|| DEFAULT_SYMBOLS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Err(Error::InvalidConfigValue(
                "FETCH_SYMBOLS lists no symbols".to_string(),
            ));
        }
        if let Some(wide) = symbols.iter().find(|s| s.chars().count() > MAX_SYMBOL_LEN) {
            return Err(Error::InvalidConfigValue(format!(
                "FETCH_SYMBOLS entry '{}' is longer than {} characters",
                wide, MAX_SYMBOL_LEN
            )));
        }

        let transfer_at = match get("TRANSFER_AT_UTC") {
            Some(raw) => NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|_| {
                Error::InvalidConfigValue(format!(
                    "TRANSFER_AT_UTC must be HH:MM, got '{}'",
                    raw
                ))
            })?,
            None => NaiveTime::from_hms_opt(0, 30, 0).unwrap_or_default(),
        };

        Ok(Self {
            redis_host: get("REDIS_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            redis_port: parse_or(&get, "REDIS_PORT", 6379)?,
            cache_key_prefix: get("CACHE_KEY_PREFIX").unwrap_or_else(|| "finpipe".to_string()),
            run_lock_ttl: Duration::from_secs(parse_or(&get, "RUN_LOCK_TTL_SECS", 3600)?),

            postgres_host: get("POSTGRES_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            postgres_port: parse_or(&get, "POSTGRES_PORT", 5432)?,
            postgres_db: get("POSTGRES_DB"),
            postgres_user: get("POSTGRES_USER"),
            postgres_password: get("POSTGRES_PASSWORD"),

            finnhub_api_key: get("FINNHUB_API_KEY"),
            symbols,
            fetch_interval: Duration::from_secs(fetch_interval_hours * 60 * 60),
            requests_per_minute: positive(&get, "FINNHUB_REQUESTS_PER_MINUTE", 60)?,
            request_timeout: Duration::from_secs(positive(&get, "FETCH_REQUEST_TIMEOUT_SECS", 10)?),
            cycle_deadline: Duration::from_secs(positive(&get, "FETCH_CYCLE_DEADLINE_SECS", 600)?),
            fetch_max_attempts: positive(&get, "FETCH_MAX_ATTEMPTS", 3)?,

            transfer_at,
            transfer_max_attempts: positive(&get, "TRANSFER_MAX_ATTEMPTS", 3)?,
            analytics_enabled: parse_bool(&get, "ANALYTICS_ENABLED", true)?,

            metrics_port: parse_or(&get, "METRICS_PORT", 9100)?,
            log_format: parse_or(&get, "FINPIPE_LOG_FORMAT", LogFormat::Text)?,
        })
    }

    /// Durable store coordinates. Database, user and password are required.
    pub fn postgres_target(&self) -> Result<PostgresTarget> {
        Ok(PostgresTarget {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: required(&self.postgres_db, "POSTGRES_DB")?,
            user: required(&self.postgres_user, "POSTGRES_USER")?,
            password: required(&self.postgres_password, "POSTGRES_PASSWORD")?,
        })
    }

    pub fn finnhub_api_key(&self) -> Result<String> {
        required(&self.finnhub_api_key, "FINNHUB_API_KEY")
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    value
        .clone()
        .ok_or_else(|| Error::InvalidConfigValue(format!("{} is required", name)))
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse::<T>().map_err(|e| {
            Error::InvalidConfigValue(format!("{}='{}': {}", name, raw, e))
        }),
        None => Ok(default),
    }
}

fn positive<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, name, default)?;
    if value <= T::default() {
        return Err(Error::InvalidConfigValue(format!(
            "{} must be greater than zero",
            name
        )));
    }
    Ok(value)
}

fn parse_bool<G>(get: &G, name: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(Error::InvalidConfigValue(format!(
            "{} must be a boolean, got '{}'",
            name, v
        ))),
    }
}
