//! Configuration types for taskmill.
//!
//! This module contains all configuration structures used throughout
//! taskmill: worker pool settings, the broker retry policy and logging
//! parameters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a taskmill service.
///
/// # Examples
///
/// ```rust
/// use taskmill::config::{MillConfig, WorkerConfig};
///
/// // Use default configuration (10 workers, 5 retry attempts)
/// let config = MillConfig::default();
///
/// // Custom configuration
/// let config = MillConfig {
///     workers: WorkerConfig::with_workers(4).with_dequeue_timeout(250),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MillConfig {
    /// Worker pool configuration
    pub workers: WorkerConfig,

    /// Retry policy applied by the broker to retryable failures
    pub retry: RetryPolicy,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for MillConfig {
    fn default() -> Self {
        Self {
            workers: WorkerConfig::default(),
            retry: RetryPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent execution slots
    pub num_workers: usize,

    /// Bounded poll: how long a worker blocks on the broker waiting for a
    /// task before re-checking the drain signal (in milliseconds)
    pub dequeue_timeout_ms: u64,

    /// How long a worker sleeps after an empty poll (in milliseconds)
    pub idle_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 10,
            dequeue_timeout_ms: 500,
            idle_backoff_ms: 250,
        }
    }
}

impl WorkerConfig {
    /// Create a worker configuration with a specific number of slots.
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Set the bounded dequeue poll timeout.
    pub fn with_dequeue_timeout(mut self, timeout_ms: u64) -> Self {
        self.dequeue_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle backoff.
    pub fn with_idle_backoff(mut self, backoff_ms: u64) -> Self {
        self.idle_backoff_ms = backoff_ms;
        self
    }

    /// Bounded poll timeout as a [`Duration`].
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    /// Idle backoff as a [`Duration`].
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

/// Retry policy applied by the broker to retryable task failures.
///
/// A retryable failure on attempt `n` schedules redelivery after
/// `base_delay_ms * multiplier^(n-1)`, capped at `max_delay_ms`. After
/// `max_attempts` delivery attempts the task is moved to the dead state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (first attempt included)
    pub max_attempts: u32,

    /// Base delay before the first retry (in milliseconds)
    pub base_delay_ms: u64,

    /// Ceiling on the computed delay (in milliseconds)
    pub max_delay_ms: u64,

    /// Exponential growth factor between attempts
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a given attempt budget and default backoff.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays between attempts.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            multiplier: 1.0,
        }
    }

    /// Delay to apply before redelivering a task that failed on `attempt`
    /// (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(exp as i32);
        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }

    /// Whether a task that just failed its `attempt`-th delivery has any
    /// attempts left.
    pub fn attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            include_targets: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl MillConfig {
    /// Configuration optimized for development.
    pub fn development() -> Self {
        Self {
            workers: WorkerConfig {
                num_workers: 2,
                dequeue_timeout_ms: 250,
                idle_backoff_ms: 100,
            },
            retry: RetryPolicy::with_max_attempts(3),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Configuration optimized for production.
    pub fn production() -> Self {
        Self {
            workers: WorkerConfig {
                num_workers: (num_cpus::get() * 2).max(10),
                ..Default::default()
            },
            retry: RetryPolicy::default(),
            logging: LoggingConfig {
                level: LogLevel::Info,
                json_format: true,
                ..Default::default()
            },
        }
    }

    /// Configuration for tests: tight timeouts, fast retries.
    pub fn testing() -> Self {
        Self {
            workers: WorkerConfig {
                num_workers: 1,
                dequeue_timeout_ms: 50,
                idle_backoff_ms: 10,
            },
            retry: RetryPolicy::fixed(2, 10),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.workers.num_workers == 0 {
            errors.push("number of workers must be greater than 0".to_string());
        }

        if self.workers.num_workers > 1000 {
            errors.push("number of workers should not exceed 1000".to_string());
        }

        if self.workers.dequeue_timeout_ms == 0 {
            errors.push("dequeue timeout must be greater than 0".to_string());
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry max attempts must be greater than 0".to_string());
        }

        if self.retry.base_delay_ms == 0 {
            errors.push("retry base delay must be greater than 0".to_string());
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            errors.push("retry max delay must be greater than or equal to base delay".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MillConfig::default();
        assert_eq!(config.workers.num_workers, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert!(MillConfig::development().validate().is_ok());
        assert!(MillConfig::production().validate().is_ok());
        assert!(MillConfig::testing().validate().is_ok());
        assert!(MillConfig::production().workers.num_workers >= 10);
    }

    #[test]
    fn test_config_validation() {
        let mut config = MillConfig::default();
        assert!(config.validate().is_ok());

        config.workers.num_workers = 0;
        assert!(config.validate().is_err());
        config.workers.num_workers = 1;

        config.retry.max_delay_ms = 10;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max delay")));
    }

    #[test]
    fn test_retry_backoff_curve() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        // Capped at max_delay_ms
        assert_eq!(policy.delay_for_attempt(30), Duration::from_millis(60_000));

        assert!(policy.attempts_remaining(4));
        assert!(!policy.attempts_remaining(5));
    }

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(3, 100);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(100));
    }

    #[test]
    fn test_worker_config_builders() {
        let config = WorkerConfig::with_workers(4)
            .with_dequeue_timeout(100)
            .with_idle_backoff(50);
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.dequeue_timeout(), Duration::from_millis(100));
        assert_eq!(config.idle_backoff(), Duration::from_millis(50));
    }
}
