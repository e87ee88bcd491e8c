//! # Backend Address Resolution
//!
//! The cache endpoint comes from the deployment environment: `REDISHOST`
//! names the server and `REDISPORT` optionally overrides the standard port.

use std::env;

use thiserror::Error;

/// Standard port of the cache backend.
pub const DEFAULT_PORT: &str = "6379";

/// Errors resolving the backend address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `REDISHOST` is unset or empty.
    #[error("no REDISHOST environment")]
    MissingHost,
}

/// Returns the backend address from environment variables.
pub fn addr_from_env() -> Result<String, ConfigError> {
    let host = env::var("REDISHOST")
        .ok()
        .filter(|host| !host.is_empty())
        .ok_or(ConfigError::MissingHost)?;
    let port = env::var("REDISPORT")
        .ok()
        .filter(|port| !port.is_empty())
        .unwrap_or_else(|| DEFAULT_PORT.to_string());
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test covers all cases; parallel tests must not race on the
    // process environment.
    #[test]
    fn resolves_addr_from_environment() {
        env::remove_var("REDISHOST");
        env::remove_var("REDISPORT");
        assert_eq!(addr_from_env(), Err(ConfigError::MissingHost));

        env::set_var("REDISHOST", "cache.internal");
        assert_eq!(addr_from_env().unwrap(), "cache.internal:6379");

        env::set_var("REDISPORT", "6380");
        assert_eq!(addr_from_env().unwrap(), "cache.internal:6380");

        env::remove_var("REDISHOST");
        env::remove_var("REDISPORT");
    }
}
