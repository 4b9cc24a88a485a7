//! Process configuration loaded from environment variables.
//!
//! Defaults match a local docker-compose deployment (Postgres on 5432,
//! Redis on 6379) running the in-memory stores unless told otherwise.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use taskpipe_core::RESULT_CACHE_TTL;

pub const DEFAULT_PARTITIONS: u32 = 3;
pub const DEFAULT_CONSUMER_GROUP: &str = "task-processor-group";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskpipeConfig {
    pub database_url: String,
    pub redis_url: String,
    pub use_persistent_stores: bool,
    pub partitions: u32,
    pub consumer_group: String,
    pub http_addr: SocketAddr,
    pub result_cache_ttl: Duration,
}

impl TaskpipeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; `from_env` with a seam for tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                var("DATABASE_USER", "task"),
                var("DATABASE_PASSWORD", "task"),
                var("DATABASE_HOST", "localhost"),
                parse::<u16>("DATABASE_PORT", &var("DATABASE_PORT", "5432"))?,
                var("DATABASE_NAME", "taskdb"),
            ),
        };

        let redis_url = match lookup("REDIS_URL") {
            Some(url) => url,
            None => format!(
                "redis://{}:{}",
                var("REDIS_HOST", "127.0.0.1"),
                parse::<u16>("REDIS_PORT", &var("REDIS_PORT", "6379"))?,
            ),
        };

        let use_persistent_stores = parse_bool(
            "USE_PERSISTENT_STORES",
            &var("USE_PERSISTENT_STORES", "false"),
        )?;

        let partitions = parse::<u32>(
            "QUEUE_PARTITIONS",
            &var("QUEUE_PARTITIONS", &DEFAULT_PARTITIONS.to_string()),
        )?;
        if partitions == 0 {
            return Err(ConfigError::invalid(
                "QUEUE_PARTITIONS",
                "0",
                "must be at least 1",
            ));
        }

        let ttl_secs = parse::<u64>(
            "RESULT_CACHE_TTL_SECS",
            &var(
                "RESULT_CACHE_TTL_SECS",
                &RESULT_CACHE_TTL.as_secs().to_string(),
            ),
        )?;
        if ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "RESULT_CACHE_TTL_SECS",
                "0",
                "must be at least 1",
            ));
        }

        Ok(Self {
            database_url,
            redis_url,
            use_persistent_stores,
            partitions,
            consumer_group: var("QUEUE_CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP),
            http_addr: parse("HTTP_ADDR", &var("HTTP_ADDR", DEFAULT_HTTP_ADDR))?,
            result_cache_ttl: Duration::from_secs(ttl_secs),
        })
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(var, raw, e))
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid(var, raw, "expected a boolean")),
    }
}
