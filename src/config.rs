//! Configuration
//!
//! Loaded entirely from environment variables, following the option
//! table in the design doc. Every field has a default so the service
//! starts against a local mock without any env setup beyond the
//! upstream address.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub org: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub flush_interval: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from the process environment, applying the
    /// defaults documented in the design doc's configuration surface.
    pub fn from_env() -> Self {
        let flush_interval_ms: u64 = std::env::var("FLUSH_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        Config {
            server: ServerConfig {
                bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            },
            upstream: UpstreamConfig {
                base_url: env_or("UPSTREAM_BASE_URL", "https://api.openai.com"),
                api_key: env_or("UPSTREAM_API_KEY", ""),
                org: std::env::var("UPSTREAM_ORG").ok(),
                model: env_or("MODEL", "code-davinci-002"),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "sqlite://data.sqlite"),
            },
            scheduler: SchedulerConfig {
                flush_interval: Duration::from_millis(flush_interval_ms),
            },
        }
    }
}
