use anyhow::{bail, Context, Result};
use std::env;

/// Default minimum score for persisting a similarity edge.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.3;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Web server
    pub api_host: String,
    pub api_port: u16,
    pub allowed_origins: Vec<String>,

    // Pipeline
    pub similarity_threshold: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parse_env("API_PORT", 3000)?,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            similarity_threshold: parse_env("SIMILARITY_THRESHOLD", DEFAULT_SIMILARITY_THRESHOLD)?,
        };

        if !(0.0..=1.0).contains(&config.similarity_threshold) {
            bail!(
                "SIMILARITY_THRESHOLD must be within 0..=1, got {}",
                config.similarity_threshold
            );
        }

        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", redact_url(&self.database_url));
        tracing::info!("  API: {}:{}", self.api_host, self.api_port);
        tracing::info!("  SIMILARITY_THRESHOLD: {}", self.similarity_threshold);
        if self.allowed_origins.is_empty() {
            tracing::info!("  ALLOWED_ORIGINS: <any>");
        } else {
            tracing::info!("  ALLOWED_ORIGINS: {}", self.allowed_origins.join(","));
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

/// Hide credentials in a connection URL before logging it.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
