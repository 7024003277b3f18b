use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub allowed_origins: Vec<String>,
    pub event_stream: String,
    pub consumer_group: String,
    pub ws: WsConfig,
}

/// Per-connection WebSocket tuning.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Capacity of each connection's outbound queue
    pub outbound_capacity: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = WsConfig::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: env::var("NATS_URL")
                .unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "chat-server".to_string()),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|origins| parse_list(&origins))
                .unwrap_or_default(),
            event_stream: env::var("EVENT_STREAM").unwrap_or_else(|_| "CHAT_EVENTS".to_string()),
            consumer_group: env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| "chat-cache-reconciler".to_string()),
            ws: WsConfig {
                outbound_capacity: env_or("WS_OUTBOUND_CAPACITY", defaults.outbound_capacity)?,
                ping_interval: Duration::from_secs(env_or(
                    "WS_PING_INTERVAL_SECS",
                    defaults.ping_interval.as_secs(),
                )?),
                pong_timeout: Duration::from_secs(env_or(
                    "WS_PONG_TIMEOUT_SECS",
                    defaults.pong_timeout.as_secs(),
                )?),
                write_timeout: Duration::from_secs(env_or(
                    "WS_WRITE_TIMEOUT_SECS",
                    defaults.write_timeout.as_secs(),
                )?),
            },
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
