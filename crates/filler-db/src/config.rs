use crate::pool::PoolConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool; sized from the worker
    /// count when unset
    #[serde(default)]
    pub max_connections: Option<u32>,

    /// Minimum number of connections opened up front; sized from the worker
    /// count when unset
    #[serde(default)]
    pub min_connections: Option<u32>,

    /// Longest wait for a free pool slot, in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Checkout attempts before the pool is reported unavailable
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,

    /// Server-side statement timeout in milliseconds; 0 disables it
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    4
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_acquire_attempts() -> u32 {
    5
}

fn default_statement_timeout() -> u64 {
    30_000
}

impl DatabaseConfig {
    /// Config for `url` with every other field at its default
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: None,
            min_connections: None,
            acquire_timeout_secs: default_acquire_timeout(),
            acquire_attempts: default_acquire_attempts(),
            statement_timeout_ms: default_statement_timeout(),
        }
    }

    /// Read overrides from the environment on top of `url`
    pub fn from_env(url: impl Into<String>) -> Self {
        Self::from_lookup(url, |key| std::env::var(key).ok())
    }

    fn from_lookup(url: impl Into<String>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|s| s.parse().ok())
        }

        let defaults = Self::new(url);
        Self {
            max_connections: parsed(lookup("DATABASE_MAX_CONNECTIONS")),
            min_connections: parsed(lookup("DATABASE_MIN_CONNECTIONS")),
            acquire_timeout_secs: parsed(lookup("DATABASE_ACQUIRE_TIMEOUT"))
                .unwrap_or(defaults.acquire_timeout_secs),
            acquire_attempts: parsed(lookup("DATABASE_ACQUIRE_ATTEMPTS"))
                .unwrap_or(defaults.acquire_attempts),
            statement_timeout_ms: parsed(lookup("DATABASE_STATEMENT_TIMEOUT_MS"))
                .unwrap_or(defaults.statement_timeout_ms),
            url: defaults.url,
        }
    }

    /// Size the pool for `workers` concurrent fillers (min = workers,
    /// max = 2 × workers), keeping any bound set explicitly
    pub fn sized_for_workers(mut self, workers: usize) -> Self {
        let workers = workers.max(1) as u32;
        self.min_connections.get_or_insert(workers);
        self.max_connections.get_or_insert(workers * 2);
        self
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_ms > 0).then(|| Duration::from_millis(self.statement_timeout_ms))
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_connections: self.min_connections.unwrap_or(default_min_connections()),
            max_connections: self.max_connections.unwrap_or(default_max_connections()),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            acquire_attempts: self.acquire_attempts,
            ..PoolConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_sized_for_workers() {
        let config = DatabaseConfig::new("postgres://localhost/orders").sized_for_workers(3);
        assert_eq!(config.min_connections, Some(3));
        assert_eq!(config.max_connections, Some(6));

        let pool = config.pool_config();
        assert_eq!(pool.min_connections, 3);
        assert_eq!(pool.max_connections, 6);
        assert_eq!(pool.acquire_attempts, 5);
    }

    #[test]
    fn test_env_pool_bounds_survive_worker_sizing() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_MAX_CONNECTIONS", "17"),
            ("DATABASE_ACQUIRE_TIMEOUT", "5"),
        ]);
        let config = DatabaseConfig::from_lookup("postgres://localhost/orders", |key| {
            env.get(key).map(|v| v.to_string())
        })
        .sized_for_workers(2);

        let pool = config.pool_config();
        assert_eq!(pool.max_connections, 17);
        assert_eq!(pool.min_connections, 2);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_unset_bounds_fall_back_to_defaults() {
        let pool = DatabaseConfig::new("postgres://localhost/orders").pool_config();
        assert_eq!(pool.min_connections, 2);
        assert_eq!(pool.max_connections, 4);
    }

    #[test]
    fn test_zero_statement_timeout_disables_it() {
        let mut config = DatabaseConfig::new("postgres://localhost/orders");
        assert_eq!(config.statement_timeout(), Some(Duration::from_secs(30)));
        config.statement_timeout_ms = 0;
        assert_eq!(config.statement_timeout(), None);
    }
}
