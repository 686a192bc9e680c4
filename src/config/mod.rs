//! Configuration module for the topic voting backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// How long a login session stays valid
    pub session_ttl: Duration,
    /// Mark the session cookie `Secure` (serve over HTTPS only)
    pub secure_cookies: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("TOPICS_DB_PATH")
            .unwrap_or_else(|| "./data/topics.sqlite".to_string())
            .into();

        let bind_addr = lookup("TOPICS_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid TOPICS_BIND_ADDR format: {}", e)))?;

        let log_level = lookup("TOPICS_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let ttl_hours: i64 = match lookup("TOPICS_SESSION_TTL_HOURS") {
            Some(raw) => raw.parse().map_err(|e| {
                AppError::Internal(format!("Invalid TOPICS_SESSION_TTL_HOURS: {}", e))
            })?,
            None => 24 * 7,
        };
        if ttl_hours <= 0 {
            return Err(AppError::Internal(
                "TOPICS_SESSION_TTL_HOURS must be positive".to_string(),
            ));
        }

        let secure_cookies = match lookup("TOPICS_SECURE_COOKIES").as_deref() {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(AppError::Internal(format!(
                    "Invalid TOPICS_SECURE_COOKIES value: {}",
                    other
                )))
            }
        };

        Ok(Self {
            db_path,
            bind_addr,
            log_level,
            session_ttl: Duration::hours(ttl_hours),
            secure_cookies,
        })
    }
}
