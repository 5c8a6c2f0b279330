//! # Funnel Events
//!
//! Client-side telemetry queue for the lead-generation funnel.
//!
//! Funnel pages (landing page, quiz, VSL, booking) record events as the
//! visitor moves through them. [`EventQueue`] buffers those events in memory
//! and delivers them in batches to the `analytics-batch` ingestion endpoint,
//! riding out offline periods and page teardown without ever surfacing an
//! error to the code that recorded the event.
//!
//! ## Features
//!
//! - **Fire-and-forget recording**: [`EventQueue::add`] never blocks or fails.
//!
//! - **Batching**: reaching `batch_size` flushes immediately, a periodic
//!   timer flushes the rest.
//!
//! - **Retry by re-queue**: a failed batch goes back to the head of the queue
//!   and is retried on the next tick or when connectivity returns.
//!
//! - **Teardown delivery**: when the page is hidden or unloaded the queue is
//!   handed to a beacon transport that outlives the page.
//!
//! - **Bounded memory**: beyond `max_queued_events` the oldest events are
//!   dropped.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use funnel_events::{event_data, EventQueue, LifecycleBroadcaster, NetworkMonitor, QueueConfig};
//!
//! let network = NetworkMonitor::new(true);
//! let lifecycle = LifecycleBroadcaster::new();
//!
//! let queue = EventQueue::builder(QueueConfig::with_endpoint(
//!     "https://api.exemple.ca/functions/v1/analytics-batch",
//! ))
//! .network(network.clone())
//! .lifecycle(lifecycle.clone())
//! .build()?;
//!
//! queue.add("quiz_answer", event_data! { "question" => 2, "answer" => "oui" }, None);
//! queue.track_for_lead("booking_submitted", "lead-123");
//!
//! // later, at teardown
//! queue.shutdown().await;
//! ```
//!
//! ## Architecture
//!
//! - [`event`]: the queued event value type
//! - [`record`]: wire records and batches sent to the endpoint
//! - [`queue`]: the queue itself and its builder
//! - [`transport`]: batch and beacon transport traits, HTTP implementations
//! - [`environment`]: connectivity, page lifecycle and clock capabilities
//! - [`config`]: configuration presets and validation
//! - [`mock`]: in-memory transports for tests
//! - [`error`]: error types

pub mod config;
pub mod environment;
pub mod error;
pub mod event;
pub mod mock;
pub mod queue;
pub mod record;
pub mod stats;
pub mod transport;

mod worker;

// Re-export main types
pub use config::{ConfigWarning, QueueConfig};
pub use environment::{
    AlwaysOnline, Clock, LifecycleBroadcaster, ManualClock, NetworkMonitor,
    NetworkStatusProvider, PageLifecycle, PageLifecycleNotifier, SystemClock,
};
pub use error::{QueueError, QueueResult, TransportError};
pub use event::{EventData, LeadId, QueuedEvent};
pub use mock::{MockBatchTransport, MockBeaconTransport, MockBehavior};
pub use queue::{EventQueue, EventQueueBuilder, FlushOutcome, SkipReason};
pub use record::{EventBatch, EventRecord, PageContext};
pub use stats::QueueStats;
pub use transport::{BatchTransport, BeaconTransport, HttpBatchTransport, HttpBeaconTransport};

#[doc(hidden)]
pub mod __private {
    pub use serde_json::json;
}
