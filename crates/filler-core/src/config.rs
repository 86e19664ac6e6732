use crate::error::{FillerError, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Retry policy for transactional work
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait before the first retry; doubles on every further retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    100
}

impl RetryConfig {
    pub fn from_env() -> Self {
        Self {
            max_retries: env_or("FILL_MAX_RETRIES", default_max_retries()),
            backoff_base_ms: env_or("FILL_BACKOFF_BASE_MS", default_backoff_base_ms()),
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// Parallel fill driver settings
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Number of concurrent fill workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between progress reports
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_workers() -> usize {
    2
}

fn default_report_interval_secs() -> u64 {
    30
}

impl DriverConfig {
    pub fn from_env() -> Self {
        Self {
            workers: env_or("FILL_WORKERS", default_workers()),
            report_interval_secs: env_or("FILL_REPORT_INTERVAL_SECS", default_report_interval_secs()),
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Pool sizing that keeps every worker supplied: (min, max)
    pub fn pool_bounds(&self) -> (u32, u32) {
        let workers = self.workers as u32;
        (workers, workers * 2)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(FillerError::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.report_interval_secs == 0 {
            return Err(FillerError::InvalidConfig(
                "report interval must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

/// Bulk order insertion settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Orders per insert transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    8
}

impl LoaderConfig {
    pub fn from_env() -> Self {
        Self {
            batch_size: env_or("INSERT_BATCH_SIZE", default_batch_size()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(FillerError::InvalidConfig("batch size must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Synthetic order generation settings
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// Orders file shared by the generate, insert and fill phases
    #[serde(default = "default_orders_file")]
    pub orders_file: PathBuf,

    /// Orders written by the generate phase
    #[serde(default = "default_total_orders")]
    pub total_orders: usize,
}

fn default_orders_file() -> PathBuf {
    PathBuf::from("orders_1m.csv")
}

fn default_total_orders() -> usize {
    30_000
}

impl GeneratorConfig {
    pub fn from_env() -> Self {
        Self {
            orders_file: env::var("ORDERS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_orders_file()),
            total_orders: env_or("TOTAL_ORDERS", default_total_orders()),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            orders_file: default_orders_file(),
            total_orders: default_total_orders(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_bounds_follow_workers() {
        let config = DriverConfig {
            workers: 3,
            report_interval_secs: 30,
        };
        assert_eq!(config.pool_bounds(), (3, 6));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = DriverConfig {
            workers: 0,
            report_interval_secs: 30,
        };
        assert!(matches!(config.validate(), Err(FillerError::InvalidConfig(_))));
    }

    #[test]
    fn test_retry_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_base(), Duration::from_millis(100));
    }
}
