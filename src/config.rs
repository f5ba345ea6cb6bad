//! Process-wide configuration, read once at startup.
//!
//! Mirrors `core/env.py`'s `.env`-then-environment precedence: a `.env` file in the
//! working directory is loaded (if present) before the process environment is read, so
//! environment variables always win.

use std::time::Duration;

#[derive(Clone, Debug)]
pub enum DegradedMode {
    Allow,
    Deny,
}

#[derive(Clone, Debug)]
pub struct FallbackPolicy {
    pub enabled: bool,
    pub window_sec: u64,
    pub max_calls: u64,
    pub block_sec: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub policy_database_url: String,
    pub redis_url: String,

    pub fallback: FallbackPolicy,
    pub event_sampling: f64,

    pub db_connection_timeout: Duration,
    pub http_timeout: Duration,

    pub kv_degraded_mode: DegradedMode,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Best effort; absence of a `.env` file is not an error.
        let _ = dotenvy::dotenv();

        let database_url = require_env("DATABASE_URL")?;
        let policy_database_url = require_env("POLICY_DATABASE_URL")?;
        let redis_url = require_env("REDIS_URL")?;

        let fallback = FallbackPolicy {
            enabled: env_bool("USER_RATE_LIMIT_ENABLED", true),
            window_sec: env_u64("USER_RATE_LIMIT_WINDOW_SEC", 3600),
            max_calls: env_u64("USER_RATE_LIMIT_MAX_CALLS", 1),
            block_sec: env_u64("USER_RATE_LIMIT_BLOCK_SEC", 10800),
        };

        let event_sampling = env_f64("RATE_EVENT_SAMPLING", 1.0).clamp(0.0, 1.0);

        let db_connection_timeout = Duration::from_secs(env_u64("DB_CONNECTION_TIMEOUT", 300));
        let http_timeout = Duration::from_secs(env_u64("HTTP_TIMEOUT", 900));

        let kv_degraded_mode = match std::env::var("KV_DEGRADED_MODE")
            .unwrap_or_else(|_| "deny".to_string())
            .to_lowercase()
            .as_str()
        {
            "allow" => DegradedMode::Allow,
            _ => DegradedMode::Deny,
        };

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8508".to_string());

        Ok(Self {
            database_url,
            policy_database_url,
            redis_url,
            fallback,
            event_sampling,
            db_connection_timeout,
            http_timeout,
            kv_degraded_mode,
            bind_addr,
        })
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{key} not set; check your .env"))
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
