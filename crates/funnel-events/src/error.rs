//! Error types for the funnel event pipeline
//!
//! Nothing in here ever reaches a caller of [`EventQueue::add`](crate::EventQueue::add).
//! Transport errors are caught by the queue and turned into re-queues and log
//! entries; queue errors only surface while building the queue.

use thiserror::Error;

use crate::config::ConfigWarning;

/// Errors raised by a batch or beacon transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never produced a response (DNS, connect, reset...)
    #[error("Network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-success status
    #[error("Endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The request did not complete within the configured timeout
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The batch could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Beacon payload exceeds what the transport accepts
    #[error("Payload too large (size: {size}, max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The transport cannot be used right now (no runtime, closed client)
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// The transport refused the payload outright
    #[error("Payload rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether retrying the same batch later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network(_)
            | TransportError::Timeout(_)
            | TransportError::Unavailable(_) => true,
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            TransportError::Serialization(_)
            | TransportError::PayloadTooLarge { .. }
            | TransportError::Rejected(_) => false,
        }
    }
}

/// Errors raised while constructing or starting an [`EventQueue`](crate::EventQueue)
#[derive(Debug, Error)]
pub enum QueueError {
    /// The configuration cannot produce a working queue
    #[error("Invalid queue configuration: {}", format_warnings(.0))]
    InvalidConfig(Vec<ConfigWarning>),

    /// The queue needs a tokio runtime to run its background task
    #[error("No tokio runtime available to start the event queue")]
    NoRuntime,

    /// Transport construction failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

fn format_warnings(warnings: &[ConfigWarning]) -> String {
    warnings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for queue construction
pub type QueueResult<T> = Result<T, QueueError>;
