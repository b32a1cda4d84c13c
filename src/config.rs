use anyhow::{Context, Result, anyhow};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_HISTORY_URL: &str =
    "https://api.coingecko.com/api/v3/coins/amber/market_chart?vs_currency=usd&days=30";

/// Cadences and endpoints for the two cache refresh loops.
#[derive(Debug, Clone)]
pub struct FeederConfig {
    pub redis_url: String,
    pub token_price_url: String,
    pub history_url: String,
    pub http_timeout: Duration,
    pub spot_refresh: Duration,
    pub history_refresh: Duration,
}

#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    pub interval: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub feeder: FeederConfig,
    pub explorer_url: String,
    pub explorer_token: String,
    pub callback_url: String,
    pub firebase_cred_path: String,
    pub android_channel: String,
    pub token_symbol: String,
    pub alert_tick: Duration,
    pub keep_alive: KeepAliveConfig,
}

impl FeederConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            token_price_url: required(&lookup, "TOKEN_PRICE_URL")?,
            history_url: lookup("CG_TOKEN_PRICE_URL")
                .unwrap_or_else(|| DEFAULT_HISTORY_URL.to_string()),
            http_timeout: Duration::from_secs(parse_or(&lookup, "HTTP_TIMEOUT_SECS", 10)?),
            spot_refresh: Duration::from_secs(parse_or(&lookup, "SPOT_REFRESH_SECS", 300)?),
            history_refresh: Duration::from_secs(parse_or(
                &lookup,
                "HISTORY_REFRESH_SECS",
                12 * 60 * 60,
            )?),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database_url: required(&lookup, "DATABASE_URL")?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            feeder: FeederConfig::from_lookup(&lookup)?,
            explorer_url: required(&lookup, "EXPLORER_URL")?,
            explorer_token: required(&lookup, "EXPLORER_TOKEN")?,
            callback_url: required(&lookup, "CALLBACK_URL")?,
            firebase_cred_path: required(&lookup, "FIREBASE_CRED_PATH")?,
            android_channel: required(&lookup, "ANDROID_CHANNEL_NAME")?,
            token_symbol: lookup("TOKEN_SYMBOL").unwrap_or_else(|| "AMB".to_string()),
            alert_tick: Duration::from_secs(parse_or(&lookup, "ALERT_TICK_SECS", 330)?),
            keep_alive: KeepAliveConfig {
                interval: Duration::from_secs(parse_or(&lookup, "KEEP_ALIVE_SECS", 30)?),
                retry_delay: Duration::from_secs(parse_or(&lookup, "KEEP_ALIVE_RETRY_SECS", 5)?),
                max_retries: parse_or(&lookup, "KEEP_ALIVE_MAX_RETRIES", 6)?,
            },
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("{} must be set in .env", key))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}
