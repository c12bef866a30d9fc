//! Runtime configuration for the sync service.
//!
//! Every knob has a default; `SyncConfig::from_env()` overrides them from
//! `STAGESYNC_*` environment variables with range checks.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::Backoff;
use crate::models::DEFAULT_MAX_RETRIES;
use crate::util::normalize_text_option;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Retry queue tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub drain_interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(2),
            batch_size: 10,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay, self.jitter)
    }
}

/// Real-time channel tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub heartbeat_interval: Duration,
    /// No frame for this long marks the connection dead
    pub heartbeat_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_jitter: Duration,
    pub fallback_poll_interval: Duration,
    /// Outbound frames buffered before sends start being dropped
    pub send_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(75),
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_jitter: Duration::from_secs(1),
            fallback_poll_interval: Duration::from_secs(10),
            send_buffer: 256,
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub const fn reconnect_backoff(&self) -> Backoff {
        Backoff::new(
            self.reconnect_base_delay,
            self.reconnect_max_delay,
            self.reconnect_jitter,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub queue: QueueConfig,
    pub channel: ChannelConfig,
    /// Upper bound for any single durable store call
    pub store_timeout: Duration,
    /// When false the store adapter answers locally and never touches the store
    pub store_enabled: bool,
    /// Populate the cache from the store during `initialize`
    pub warm_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            channel: ChannelConfig::default(),
            store_timeout: Duration::from_secs(5),
            store_enabled: true,
            warm_start: true,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let drain_interval = millis_in_range(
            &lookup,
            "STAGESYNC_DRAIN_INTERVAL_MS",
            defaults.queue.drain_interval,
            50..=60_000,
        )?;
        let batch_size = usize::try_from(number_in_range(
            &lookup,
            "STAGESYNC_BATCH_SIZE",
            defaults.queue.batch_size as u64,
            1..=500,
        )?)
        .map_err(|_| ConfigError::Invalid("STAGESYNC_BATCH_SIZE is too large".to_string()))?;
        let max_retries = u32::try_from(number_in_range(
            &lookup,
            "STAGESYNC_MAX_RETRIES",
            u64::from(defaults.queue.max_retries),
            1..=20,
        )?)
        .map_err(|_| ConfigError::Invalid("STAGESYNC_MAX_RETRIES is too large".to_string()))?;
        let base_delay = millis_in_range(
            &lookup,
            "STAGESYNC_RETRY_BASE_DELAY_MS",
            defaults.queue.base_delay,
            1..=60_000,
        )?;
        let max_delay = millis_in_range(
            &lookup,
            "STAGESYNC_RETRY_MAX_DELAY_MS",
            defaults.queue.max_delay.max(base_delay),
            1..=600_000,
        )?;
        if max_delay < base_delay {
            return Err(ConfigError::Invalid(
                "STAGESYNC_RETRY_MAX_DELAY_MS must be >= STAGESYNC_RETRY_BASE_DELAY_MS".to_string(),
            ));
        }

        let heartbeat_interval = millis_in_range(
            &lookup,
            "STAGESYNC_HEARTBEAT_INTERVAL_MS",
            defaults.channel.heartbeat_interval,
            10..=600_000,
        )?;
        let max_reconnect_attempts = u32::try_from(number_in_range(
            &lookup,
            "STAGESYNC_MAX_RECONNECT_ATTEMPTS",
            u64::from(defaults.channel.max_reconnect_attempts),
            1..=50,
        )?)
        .map_err(|_| {
            ConfigError::Invalid("STAGESYNC_MAX_RECONNECT_ATTEMPTS is too large".to_string())
        })?;
        let fallback_poll_interval = millis_in_range(
            &lookup,
            "STAGESYNC_FALLBACK_POLL_INTERVAL_MS",
            defaults.channel.fallback_poll_interval,
            10..=600_000,
        )?;
        let store_timeout = millis_in_range(
            &lookup,
            "STAGESYNC_STORE_TIMEOUT_MS",
            defaults.store_timeout,
            10..=120_000,
        )?;
        let store_enabled = flag(&lookup, "STAGESYNC_STORE_ENABLED", defaults.store_enabled)?;
        let warm_start = flag(&lookup, "STAGESYNC_WARM_START", defaults.warm_start)?;

        Ok(Self {
            queue: QueueConfig {
                drain_interval,
                batch_size,
                max_retries,
                base_delay,
                max_delay,
                ..defaults.queue
            },
            channel: ChannelConfig {
                heartbeat_interval,
                heartbeat_timeout: heartbeat_interval.saturating_mul(5) / 2,
                max_reconnect_attempts,
                fallback_poll_interval,
                ..defaults.channel
            },
            store_timeout,
            store_enabled,
            warm_start,
        })
    }
}

fn number_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn millis_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
    range: std::ops::RangeInclusive<u64>,
) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    number_in_range(lookup, name, default_ms, range).map(Duration::from_millis)
}

fn flag(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{name} must be true or false"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn from_map(map: &HashMap<&str, &str>) -> Result<SyncConfig, ConfigError> {
        SyncConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = from_map(&HashMap::new()).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.queue.drain_interval, Duration::from_secs(2));
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.channel.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_trimmed_and_applied() {
        let mut map = HashMap::new();
        map.insert("STAGESYNC_BATCH_SIZE", " 25 ");
        map.insert("STAGESYNC_HEARTBEAT_INTERVAL_MS", "1000");
        map.insert("STAGESYNC_STORE_ENABLED", "off");

        let config = from_map(&map).unwrap();
        assert_eq!(config.queue.batch_size, 25);
        assert_eq!(config.channel.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.channel.heartbeat_timeout, Duration::from_millis(2_500));
        assert!(!config.store_enabled);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut map = HashMap::new();
        map.insert("STAGESYNC_MAX_RETRIES", "0");
        let err = from_map(&map).unwrap_err();
        assert!(err.to_string().contains("STAGESYNC_MAX_RETRIES"));

        let mut map = HashMap::new();
        map.insert("STAGESYNC_RETRY_BASE_DELAY_MS", "5000");
        map.insert("STAGESYNC_RETRY_MAX_DELAY_MS", "100");
        assert!(from_map(&map).is_err());
    }

    #[test]
    fn flags_reject_garbage() {
        let mut map = HashMap::new();
        map.insert("STAGESYNC_WARM_START", "maybe");
        assert!(from_map(&map).is_err());
    }
}
