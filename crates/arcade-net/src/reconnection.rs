//! Exponential backoff with jitter for re-establishing a dropped link.
//!
//! [`ReconnectState`] hands out increasingly long delays until the configured
//! attempt budget runs out; the adapter's supervisor sleeps on each one before
//! asking its connector for a fresh link.

use std::time::Duration;

use arcade_config::NetworkConfig;
use rand::Rng;

/// Configuration for reconnection behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1 s.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Maximum delay between attempts. Default: 30 s.
    pub max_delay: Duration,
    /// Attempts before giving up. Default: 10.
    pub max_attempts: u32,
    /// Jitter factor (0.0 - 1.0) applied as +/- to each delay. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: 0.25,
        }
    }
}

impl From<&NetworkConfig> for ReconnectConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(network.reconnect_initial_delay_ms),
            backoff_multiplier: network.reconnect_backoff_multiplier,
            max_delay: Duration::from_millis(network.reconnect_max_delay_ms),
            max_attempts: network.reconnect_max_attempts,
            jitter: network.reconnect_jitter,
        }
    }
}

/// Tracks the attempt count and computes the next backoff delay.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Compute the next delay and advance the attempt counter.
    /// Returns `None` once max attempts have been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }

        let base = self.current_delay;
        self.attempts += 1;

        // Uniform in [base * (1 - jitter), base * (1 + jitter)]
        let jittered = if self.config.jitter > 0.0 {
            let factor = rand::rng()
                .random_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        let next = self.current_delay.mul_f64(self.config.backoff_multiplier);
        self.current_delay = next.min(self.config.max_delay);

        Some(jittered.min(self.config.max_delay))
    }

    /// Start over after a link came up.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let mut state = ReconnectState::new(config_no_jitter());
        let delays: Vec<u64> = (0..7)
            .map(|_| state.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut state = ReconnectState::new(ReconnectConfig {
            max_attempts: 3,
            ..config_no_jitter()
        });
        for _ in 0..3 {
            assert!(state.next_delay().is_some());
        }
        assert!(state.next_delay().is_none());
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn test_reset_restores_initial_delay() {
        let mut state = ReconnectState::new(config_no_jitter());
        state.next_delay();
        state.next_delay();
        state.reset();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut state = ReconnectState::new(ReconnectConfig {
            jitter: 0.5,
            max_attempts: 1,
            ..Default::default()
        });
        let delay = state.next_delay().unwrap();
        assert!(delay >= Duration::from_millis(500));
        assert!(delay <= Duration::from_millis(1500));
    }

    #[test]
    fn test_from_network_config() {
        let network = NetworkConfig {
            reconnect_initial_delay_ms: 250,
            reconnect_max_attempts: 4,
            ..Default::default()
        };
        let config = ReconnectConfig::from(&network);
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }
}
