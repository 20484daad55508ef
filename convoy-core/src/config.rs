//! Configuration types
//!
//! Each struct has a `Default` suitable for development and a `from_env()`
//! that overlays `CONVOY_*` environment variables on top of it.

use crate::error::{ConfigError, ConvoyError, ConvoyResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConvoyError {
    ConvoyError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// ============================================================================
// STORE
// ============================================================================

/// Where the event log lives.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// LMDB directory. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// LMDB map size in megabytes.
    pub lmdb_map_size_mb: usize,
    /// Page size used when replaying the log into projections.
    pub replay_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            lmdb_map_size_mb: 1024,
            replay_batch_size: 512,
        }
    }
}

impl StoreConfig {
    /// Environment variables:
    /// - `CONVOY_DATA_DIR`: LMDB directory (unset = in-memory)
    /// - `CONVOY_LMDB_MAP_SIZE_MB`: map size (default: 1024)
    /// - `CONVOY_REPLAY_BATCH_SIZE`: replay page size (default: 512)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("CONVOY_DATA_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            lmdb_map_size_mb: env_or("CONVOY_LMDB_MAP_SIZE_MB", defaults.lmdb_map_size_mb),
            replay_batch_size: env_or("CONVOY_REPLAY_BATCH_SIZE", defaults.replay_batch_size),
        }
    }

    pub fn validate(&self) -> ConvoyResult<()> {
        if self.lmdb_map_size_mb == 0 {
            return Err(invalid("lmdb_map_size_mb", 0, "must be greater than 0"));
        }
        if self.replay_batch_size == 0 {
            return Err(invalid("replay_batch_size", 0, "must be greater than 0"));
        }
        Ok(())
    }
}

// ============================================================================
// LEASES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct LeaseConfig {
    /// TTL used when a reserve request does not name one.
    pub default_ttl_secs: i64,
    /// Upper bound accepted for `ttl_seconds`.
    pub max_ttl_secs: i64,
    /// Agents not seen for this long are reported as idle.
    pub agent_idle_after_secs: i64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            max_ttl_secs: 86_400,
            agent_idle_after_secs: 900,
        }
    }
}

impl LeaseConfig {
    /// Environment variables:
    /// - `CONVOY_LEASE_DEFAULT_TTL_SECS` (default: 3600)
    /// - `CONVOY_LEASE_MAX_TTL_SECS` (default: 86400)
    /// - `CONVOY_AGENT_IDLE_AFTER_SECS` (default: 900)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_ttl_secs: env_or("CONVOY_LEASE_DEFAULT_TTL_SECS", defaults.default_ttl_secs),
            max_ttl_secs: env_or("CONVOY_LEASE_MAX_TTL_SECS", defaults.max_ttl_secs),
            agent_idle_after_secs: env_or(
                "CONVOY_AGENT_IDLE_AFTER_SECS",
                defaults.agent_idle_after_secs,
            ),
        }
    }

    pub fn validate(&self) -> ConvoyResult<()> {
        if self.default_ttl_secs <= 0 {
            return Err(invalid(
                "default_ttl_secs",
                self.default_ttl_secs,
                "must be greater than 0",
            ));
        }
        if self.max_ttl_secs < self.default_ttl_secs {
            return Err(invalid(
                "max_ttl_secs",
                self.max_ttl_secs,
                "must be at least default_ttl_secs",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// STREAM
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Per-client buffer capacity.
    pub buffer_max_size: usize,
    /// Fraction of capacity at which a buffer is reported unhealthy.
    pub backpressure_threshold: f64,
    /// Interval between SSE keep-alive comments.
    pub keep_alive: Duration,
    /// How long a tailer waits for a wake-up before re-checking the log.
    pub tail_poll_interval: Duration,
    /// Page size for cursor replay.
    pub replay_page_size: usize,
    /// Frames in flight between a client task and its transport.
    pub transport_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_max_size: 1000,
            backpressure_threshold: 0.5,
            keep_alive: Duration::from_secs(15),
            tail_poll_interval: Duration::from_millis(500),
            replay_page_size: 256,
            transport_capacity: 16,
        }
    }
}

impl StreamConfig {
    /// Environment variables:
    /// - `CONVOY_STREAM_BUFFER_SIZE` (default: 1000)
    /// - `CONVOY_STREAM_BACKPRESSURE_THRESHOLD` (default: 0.5)
    /// - `CONVOY_STREAM_KEEPALIVE_SECS` (default: 15)
    /// - `CONVOY_STREAM_POLL_MS` (default: 500)
    /// - `CONVOY_STREAM_REPLAY_PAGE` (default: 256)
    /// - `CONVOY_STREAM_TRANSPORT_CAPACITY` (default: 16)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            buffer_max_size: env_or("CONVOY_STREAM_BUFFER_SIZE", defaults.buffer_max_size),
            backpressure_threshold: env_or(
                "CONVOY_STREAM_BACKPRESSURE_THRESHOLD",
                defaults.backpressure_threshold,
            ),
            keep_alive: Duration::from_secs(env_or(
                "CONVOY_STREAM_KEEPALIVE_SECS",
                defaults.keep_alive.as_secs(),
            )),
            tail_poll_interval: Duration::from_millis(env_or(
                "CONVOY_STREAM_POLL_MS",
                defaults.tail_poll_interval.as_millis() as u64,
            )),
            replay_page_size: env_or("CONVOY_STREAM_REPLAY_PAGE", defaults.replay_page_size),
            transport_capacity: env_or(
                "CONVOY_STREAM_TRANSPORT_CAPACITY",
                defaults.transport_capacity,
            ),
        }
    }

    pub fn validate(&self) -> ConvoyResult<()> {
        if self.buffer_max_size == 0 {
            return Err(invalid("buffer_max_size", 0, "must be greater than 0"));
        }
        if !(self.backpressure_threshold > 0.0 && self.backpressure_threshold <= 1.0) {
            return Err(invalid(
                "backpressure_threshold",
                self.backpressure_threshold,
                "must be in (0.0, 1.0]",
            ));
        }
        if self.replay_page_size == 0 {
            return Err(invalid("replay_page_size", 0, "must be greater than 0"));
        }
        if self.transport_capacity == 0 {
            return Err(invalid("transport_capacity", 0, "must be greater than 0"));
        }
        if self.tail_poll_interval.is_zero() {
            return Err(invalid(
                "tail_poll_interval",
                format!("{:?}", self.tail_poll_interval),
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(LeaseConfig::default().validate().is_ok());
        assert!(StreamConfig::default().validate().is_ok());
    }

    #[test]
    fn test_stream_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.buffer_max_size, 1000);
        assert_eq!(config.backpressure_threshold, 0.5);
    }

    #[test]
    fn test_lease_max_below_default_rejected() {
        let config = LeaseConfig {
            default_ttl_secs: 600,
            max_ttl_secs: 60,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConvoyError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "max_ttl_secs"
        ));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any threshold outside (0, 1] is rejected.
        #[test]
        fn prop_threshold_out_of_range_rejected(
            threshold in prop_oneof![-10.0f64..=0.0, 1.0001f64..10.0]
        ) {
            let config = StreamConfig {
                backpressure_threshold: threshold,
                ..Default::default()
            };
            prop_assert!(config.validate().is_err());
        }

        /// Any positive capacity with an in-range threshold is accepted.
        #[test]
        fn prop_valid_stream_config_accepted(
            size in 1usize..100_000,
            threshold in 0.01f64..=1.0
        ) {
            let config = StreamConfig {
                buffer_max_size: size,
                backpressure_threshold: threshold,
                ..Default::default()
            };
            prop_assert!(config.validate().is_ok());
        }
    }
}
