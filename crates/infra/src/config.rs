//! Configuration loading and representation.
//!
//! Everything is read from environment variables; unset or unparsable values
//! fall back to defaults so a bare process starts with in-memory backends.

use std::time::Duration;

use gascyl_inventory::DEFAULT_INSPECTION_INTERVAL_DAYS;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Output format for process logs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value; unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" | "text" => Some(LogFormat::Pretty),
            _ => None,
        }
    }

    /// Read `LOG_FORMAT` without logging, so a binary can pick its subscriber
    /// before [`InventoryConfig::from_env`] reports invalid values.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryConfig {
    /// PostgreSQL connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Redis connection string. `None` selects the in-memory cache.
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    /// Applied to cylinder types without their own inspection interval.
    pub inspection_interval_days: u32,
    pub max_page_limit: u32,
    pub db_max_connections: u32,
    pub log_format: LogFormat,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            inspection_interval_days: DEFAULT_INSPECTION_INTERVAL_DAYS,
            max_page_limit: DEFAULT_MAX_PAGE_LIMIT,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            log_format: LogFormat::Json,
        }
    }
}

impl InventoryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_format = match non_empty("LOG_FORMAT") {
            None => defaults.log_format,
            Some(raw) => LogFormat::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "unknown LOG_FORMAT; using json");
                LogFormat::Json
            }),
        };

        Self {
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
            cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
            )),
            inspection_interval_days: parse_positive(
                &lookup,
                "INSPECTION_INTERVAL_DAYS",
                defaults.inspection_interval_days,
            ),
            max_page_limit: parse_positive(&lookup, "MAX_PAGE_LIMIT", defaults.max_page_limit),
            db_max_connections: parse_positive(
                &lookup,
                "DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            ),
            log_format,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: core::str::FromStr + Copy + core::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "invalid config value; using default");
            default
        }),
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    match parse_or(lookup, key, default) {
        0 => {
            tracing::warn!(key, default, "config value must be positive; using default");
            default
        }
        v => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> InventoryConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InventoryConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(config(&[]), InventoryConfig::default());
        assert_eq!(InventoryConfig::default().cache_ttl, Duration::from_secs(600));
    }

    #[test]
    fn reads_all_known_keys() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://localhost/gascyl"),
            ("REDIS_URL", "redis://127.0.0.1/"),
            ("CACHE_TTL_SECS", "30"),
            ("INSPECTION_INTERVAL_DAYS", "365"),
            ("MAX_PAGE_LIMIT", "50"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("LOG_FORMAT", "pretty"),
        ]);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/gascyl"));
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(30));
        assert_eq!(cfg.inspection_interval_days, 365);
        assert_eq!(cfg.max_page_limit, 50);
        assert_eq!(cfg.db_max_connections, 4);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = config(&[
            ("CACHE_TTL_SECS", "ten"),
            ("MAX_PAGE_LIMIT", "0"),
            ("DATABASE_URL", "   "),
            ("LOG_FORMAT", "xml"),
        ]);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
        assert_eq!(cfg.max_page_limit, DEFAULT_MAX_PAGE_LIMIT);
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn log_format_parses_without_the_rest_of_the_config() {
        assert_eq!(LogFormat::parse(" Pretty "), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("xml"), None);
    }
}
