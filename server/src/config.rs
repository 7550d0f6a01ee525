//! Configuration management for the server.

use std::env;

/// Default cap on records returned by one download.
pub const DEFAULT_DOWNLOAD_LIMIT: i64 = 10_000;

/// Default size of the database pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Bearer token devices must present; any token is accepted when unset
    pub auth_secret: Option<String>,
    /// Most records a single download returns
    pub download_limit: i64,
    /// Upper bound on pooled PostgreSQL connections
    pub max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let download_limit = match env::var("DOWNLOAD_LIMIT") {
            Ok(value) => parse_limit(&value)?,
            Err(_) => DEFAULT_DOWNLOAD_LIMIT,
        };

        let max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| DEFAULT_MAX_CONNECTIONS.to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidMaxConnections)?;

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            download_limit,
            max_connections,
        })
    }
}

fn parse_limit(value: &str) -> Result<i64, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(ConfigError::InvalidDownloadLimit),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("DOWNLOAD_LIMIT must be a positive integer")]
    InvalidDownloadLimit,

    #[error("Invalid DB_MAX_CONNECTIONS value")]
    InvalidMaxConnections,
}
