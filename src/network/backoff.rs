//! Reconnection backoff

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Exponential backoff with optional jitter, capped at `max_delay_ms`
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether attempt number `attempt` (1-based) may be made
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.config.max_attempts
    }

    /// Delay before attempt number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms(attempt);
        let delay = if self.config.jitter {
            // Up to 25% either way
            let range = base * 0.25;
            let jitter = if range > 0.0 {
                rand::thread_rng().gen_range(-range..=range)
            } else {
                0.0
            };
            (base + jitter).clamp(0.0, self.config.max_delay_ms as f64)
        } else {
            base
        };
        Duration::from_millis(delay as u64)
    }

    /// Delay before jitter: initial * multiplier^(attempt-1), capped
    pub fn base_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);
        delay.min(self.config.max_delay_ms as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 4,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter,
        })
    }

    #[test]
    fn test_exponential_and_capped() {
        let policy = policy(false);
        let delays: Vec<u64> = (1..=6)
            .map(|a| policy.calculate_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = policy(true);
        for _ in 0..200 {
            let ms = policy.calculate_delay(3).as_millis() as u64;
            assert!((300..=500).contains(&ms), "{ms}");
        }
        // Jitter never exceeds the cap
        for _ in 0..200 {
            assert!(policy.calculate_delay(10).as_millis() <= 1000);
        }
    }

    #[test]
    fn test_retry_ceiling() {
        let policy = policy(false);
        assert!(!policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));

        let disabled = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        });
        assert!(!disabled.should_retry(1));
    }
}
