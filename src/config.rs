//! Server configuration parsed from environment variables.
//!
//! Variables:
//! - `PORT`: listen port, default 5000
//! - `DATABASE_URL`: Postgres URL; when absent messages live in memory
//! - `DB_MAX_CONNECTIONS`: pool size, default 5
//! - `WS_CLIENT_QUEUE`: per-socket outbound queue depth, default 256

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_WS_CLIENT_QUEUE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid PORT: {0}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub client_queue: usize,
}

impl ServerConfig {
    /// Build typed config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is set but not a valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is set but not a valid port number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        Ok(Self {
            port,
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            client_queue: parse_or(&lookup, "WS_CLIENT_QUEUE", DEFAULT_WS_CLIENT_QUEUE).max(1),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
