//! Retransmission parameters for one exchange.
//!
//! Defaults follow RFC 7252 §4.8: a 2 second ACK timeout, 4 retransmissions
//! and port 5683. Values are read from the environment by the binary:
//!
//! ```text
//! TERN_ACK_TIMEOUT_MS   initial receive timeout in milliseconds
//! TERN_MAX_RETRANSMIT   retransmissions after the first send
//! TERN_DEFAULT_PORT     port used when the remote port is 0
//! ```

use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_RETRANSMIT: u32 = 4;

pub const ENV_ACK_TIMEOUT_MS: &str = "TERN_ACK_TIMEOUT_MS";
pub const ENV_MAX_RETRANSMIT: &str = "TERN_MAX_RETRANSMIT";
pub const ENV_DEFAULT_PORT: &str = "TERN_DEFAULT_PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Receive timeout for the first attempt. Doubles after every attempt
    /// that times out.
    pub ack_timeout: Duration,
    /// Retransmissions after the initial send.
    pub max_retransmit: u32,
    /// Substituted when the caller leaves the remote port at 0.
    pub default_port: u16,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retransmit: DEFAULT_MAX_RETRANSMIT,
            default_port: tern_msg::DEFAULT_PORT,
        }
    }
}

impl ExchangeConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; keys it returns `None` for keep
    /// their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_ACK_TIMEOUT_MS)? {
            config.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, ENV_MAX_RETRANSMIT)? {
            config.max_retransmit = n;
        }
        if let Some(port) = parse_var::<u16>(&lookup, ENV_DEFAULT_PORT)? {
            if port == 0 {
                return Err(ConfigError::Invalid {
                    key: ENV_DEFAULT_PORT,
                    value: port.to_string(),
                });
            }
            config.default_port = port;
        }
        Ok(config)
    }

    /// Total transmissions: the first send plus every retransmission.
    pub fn attempts(&self) -> u32 {
        self.max_retransmit.saturating_add(1)
    }

    /// Receive timeout used on `attempt` (1-based): `ack_timeout * 2^(attempt-1)`,
    /// saturating at `Duration::MAX`. The engine waits exactly this long.
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        let mut timeout = self.ack_timeout;
        if timeout.is_zero() {
            return timeout;
        }
        for _ in 1..attempt {
            if timeout == Duration::MAX {
                break;
            }
            timeout = timeout.saturating_mul(2);
        }
        timeout
    }

    /// Upper bound on time spent waiting for a reply across all attempts:
    /// `ack_timeout * (2^attempts - 1)`.
    pub fn max_wait(&self) -> Duration {
        let mut total = Duration::ZERO;
        for attempt in 1..=self.attempts() {
            total = total.saturating_add(self.timeout_for(attempt));
            if total == Duration::MAX || self.ack_timeout.is_zero() {
                break;
            }
        }
        total
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ExchangeConfig::default();
        assert_eq!(config.ack_timeout, Duration::from_secs(2));
        assert_eq!(config.max_retransmit, 4);
        assert_eq!(config.default_port, 5683);
        assert_eq!(config.attempts(), 5);
    }

    #[test]
    fn overrides_from_lookup() {
        let config = ExchangeConfig::from_lookup(lookup(&[
            (ENV_ACK_TIMEOUT_MS, "250"),
            (ENV_MAX_RETRANSMIT, "0"),
            (ENV_DEFAULT_PORT, "15683"),
        ]))
        .unwrap();
        assert_eq!(config.ack_timeout, Duration::from_millis(250));
        assert_eq!(config.max_retransmit, 0);
        assert_eq!(config.attempts(), 1);
        assert_eq!(config.default_port, 15683);
    }

    #[test]
    fn missing_keys_keep_defaults() {
        let config = ExchangeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ExchangeConfig::default());
    }

    #[test]
    fn rejects_garbage_and_port_zero() {
        let err = ExchangeConfig::from_lookup(lookup(&[(ENV_MAX_RETRANSMIT, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_MAX_RETRANSMIT, .. }));

        let err = ExchangeConfig::from_lookup(lookup(&[(ENV_DEFAULT_PORT, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_DEFAULT_PORT, .. }));
    }

    #[test]
    fn timeouts_double_per_attempt() {
        let config = ExchangeConfig {
            ack_timeout: Duration::from_secs(1),
            max_retransmit: 4,
            ..Default::default()
        };
        let timeouts: Vec<u64> = (1..=config.attempts())
            .map(|k| config.timeout_for(k).as_secs())
            .collect();
        assert_eq!(timeouts, vec![1, 2, 4, 8, 16]);
        assert_eq!(config.max_wait(), Duration::from_secs(31));
    }

    #[test]
    fn schedule_stays_finite_past_32_attempts() {
        let config = ExchangeConfig {
            ack_timeout: Duration::from_millis(1),
            max_retransmit: 40,
            ..Default::default()
        };
        assert_eq!(config.timeout_for(33), Duration::from_millis(1 << 32));
        assert_eq!(config.timeout_for(41), Duration::from_millis(1 << 40));
        assert_eq!(config.max_wait(), Duration::from_millis((1 << 41) - 1));
    }

    #[test]
    fn zero_ack_timeout_stays_zero() {
        let config = ExchangeConfig {
            ack_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.timeout_for(u32::MAX), Duration::ZERO);
    }

    #[test]
    fn huge_budgets_saturate() {
        let config = ExchangeConfig {
            ack_timeout: Duration::from_secs(2),
            max_retransmit: 200,
            ..Default::default()
        };
        assert_eq!(config.timeout_for(100), Duration::MAX);
        assert_eq!(config.max_wait(), Duration::MAX);
    }
}
