//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings shared by all workers of one [`super::ReseedScheduler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause after a failed seed request or a "not worth trying" hint.
    pub retry_interval_ms: u64,
    /// Worker threads are named `<prefix>-<n>`.
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1000,
            thread_name_prefix: "reseeder".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Retry interval as a [`Duration`].
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Config with a short retry interval, for tests and demos.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis().max(1) as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.retry_interval(), Duration::from_secs(1));
        assert_eq!(config.thread_name_prefix, "reseeder");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: SchedulerConfig = toml::from_str("retry_interval_ms = 250").unwrap();
        assert_eq!(config.retry_interval_ms, 250);
        assert_eq!(config.thread_name_prefix, "reseeder");
    }

    #[test]
    fn test_retry_interval_never_zero() {
        let config = SchedulerConfig::default().with_retry_interval(Duration::ZERO);
        assert_eq!(config.retry_interval_ms, 1);
    }
}
