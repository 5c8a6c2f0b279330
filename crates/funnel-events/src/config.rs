//! Queue configuration, presets and validation

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default ingestion function path on the hosted backend
pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:54321/functions/v1/analytics-batch";

/// Longest flush interval the background timer accepts
pub const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest body a browser-style beacon accepts
pub const DEFAULT_MAX_BEACON_BYTES: usize = 64 * 1024;

/// Configuration for an [`EventQueue`](crate::EventQueue)
///
/// Durations are expressed in milliseconds when loaded from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Batch ingestion endpoint used by the normal transport
    pub endpoint_url: String,
    /// Absolute URL used by the beacon transport (defaults to `endpoint_url`)
    pub beacon_url: Option<String>,
    /// Queue length that triggers an immediate flush
    pub batch_size: usize,
    /// Period of the background flush timer
    #[serde(rename = "flush_interval_ms", with = "duration_ms")]
    pub flush_interval: Duration,
    /// Soft cap on buffered events; the oldest are dropped beyond it
    pub max_queued_events: usize,
    /// Timeout applied to each batch request
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// Largest payload handed to the beacon transport
    pub max_beacon_bytes: usize,
    /// Session id to stamp on records (a UUID v4 is generated when absent)
    pub session_id: Option<String>,
    /// Stamp the queue's session id on records that carry none
    pub stamp_session_id: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            beacon_url: None,
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            max_queued_events: 500,
            request_timeout: Duration::from_secs(5),
            max_beacon_bytes: DEFAULT_MAX_BEACON_BYTES,
            session_id: None,
            stamp_session_id: true,
        }
    }
}

impl QueueConfig {
    /// Default configuration pointed at a specific endpoint
    pub fn with_endpoint(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Self::default()
        }
    }

    /// Small batches flushed often, for pages where events must show up fast
    pub fn low_latency() -> Self {
        Self {
            batch_size: 3,
            flush_interval: Duration::from_secs(1),
            request_timeout: Duration::from_millis(800),
            ..Self::default()
        }
    }

    /// Larger batches and a tighter buffer for slow or metered devices
    pub fn constrained() -> Self {
        Self {
            batch_size: 25,
            flush_interval: Duration::from_secs(15),
            max_queued_events: 200,
            request_timeout: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// URL the beacon transport should target
    pub fn beacon_target(&self) -> &str {
        self.beacon_url.as_deref().unwrap_or(&self.endpoint_url)
    }

    /// Validate configuration invariants
    ///
    /// An empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.endpoint_url.trim().is_empty() {
            warnings.push(ConfigWarning::EmptyEndpoint);
        }

        if self.batch_size == 0 {
            warnings.push(ConfigWarning::ZeroBatchSize);
        }

        if self.max_queued_events < self.batch_size {
            warnings.push(ConfigWarning::CapBelowBatchSize);
        }

        if self.flush_interval.is_zero() {
            warnings.push(ConfigWarning::ZeroFlushInterval);
        } else if self.flush_interval < Duration::from_millis(250) {
            warnings.push(ConfigWarning::FlushIntervalTooShort);
        }

        if self.flush_interval > MAX_FLUSH_INTERVAL {
            warnings.push(ConfigWarning::FlushIntervalTooLong);
        }

        if self.request_timeout > self.flush_interval {
            warnings.push(ConfigWarning::TimeoutExceedsInterval);
        }

        warnings
    }

    /// Check if the configuration is valid (no warnings)
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Warnings that make a queue unusable
    pub fn fatal_warnings(&self) -> Vec<ConfigWarning> {
        self.validate()
            .into_iter()
            .filter(ConfigWarning::is_fatal)
            .collect()
    }
}

/// Configuration warnings and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No endpoint to send batches to
    EmptyEndpoint,
    /// Batch size of zero would flush on every add
    ZeroBatchSize,
    /// Soft cap is smaller than one batch
    CapBelowBatchSize,
    /// The periodic timer cannot run with a zero period
    ZeroFlushInterval,
    /// Flush interval is very short (< 250ms)
    FlushIntervalTooShort,
    /// Flush interval is longer than a day
    FlushIntervalTooLong,
    /// Request timeout outlives the flush interval
    TimeoutExceedsInterval,
}

impl ConfigWarning {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConfigWarning::EmptyEndpoint
                | ConfigWarning::ZeroBatchSize
                | ConfigWarning::ZeroFlushInterval
                | ConfigWarning::FlushIntervalTooLong
        )
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::EmptyEndpoint => write!(f, "endpoint_url is empty"),
            ConfigWarning::ZeroBatchSize => write!(f, "batch_size is zero"),
            ConfigWarning::CapBelowBatchSize => {
                write!(f, "max_queued_events is smaller than batch_size")
            }
            ConfigWarning::ZeroFlushInterval => write!(f, "flush_interval is zero"),
            ConfigWarning::FlushIntervalTooShort => {
                write!(f, "flush_interval is very short (< 250ms)")
            }
            ConfigWarning::FlushIntervalTooLong => {
                write!(f, "flush_interval is longer than 24h")
            }
            ConfigWarning::TimeoutExceedsInterval => {
                write!(f, "request_timeout exceeds flush_interval")
            }
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
