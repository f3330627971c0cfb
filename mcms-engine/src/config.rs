use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    // Timelock readiness polling (fixed delay, bounded attempts)
    pub readiness_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub readiness_delay: Duration,

    // How often EVM chains poll for a receipt while confirming
    #[serde(with = "humantime_serde")]
    pub receipt_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            readiness_attempts: 50,
            readiness_delay: Duration::from_millis(100), // ~5s budget in total
            receipt_poll_interval: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    pub fn with_readiness_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.readiness_attempts = attempts.max(1);
        self.readiness_delay = delay;
        self
    }

    /// Upper bound on time spent sleeping between readiness attempts.
    pub fn readiness_budget(&self) -> Duration {
        self.readiness_delay * self.readiness_attempts.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.readiness_attempts, 50);
        assert_eq!(config.readiness_delay, Duration::from_millis(100));
        assert_eq!(config.receipt_poll_interval, Duration::from_millis(500));
        assert_eq!(config.readiness_budget(), Duration::from_millis(4900));
    }

    #[test]
    fn deserializes_humantime_durations_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"readinessAttempts": 10, "readinessDelay": "250ms"}"#).unwrap();
        assert_eq!(config.readiness_attempts, 10);
        assert_eq!(config.readiness_delay, Duration::from_millis(250));
        // Unset fields fall back to defaults
        assert_eq!(config.receipt_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn zero_attempts_is_clamped() {
        let config = EngineConfig::default().with_readiness_retry(0, Duration::from_secs(1));
        assert_eq!(config.readiness_attempts, 1);
    }
}
