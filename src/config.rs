//! Server configuration read from the environment (and `.env`, via dotenvy).

use std::env;

use thiserror::Error;

/// Environment variable holding the SQLite database path or URL.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
/// Environment variable overriding [`DEFAULT_POOL_SIZE`].
pub const POOL_SIZE_ENV: &str = "DB_POOL_SIZE";
pub const DEFAULT_POOL_SIZE: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in .env")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub pool_size: u32,
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup(DATABASE_URL_ENV)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing(DATABASE_URL_ENV))?;

        let pool_size = match lookup(POOL_SIZE_ENV) {
            None => DEFAULT_POOL_SIZE,
            Some(value) => match value.trim().parse::<u32>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: POOL_SIZE_ENV,
                        value,
                    })
                }
            },
        };

        Ok(Self {
            database_url,
            pool_size,
        })
    }
}
