//! In-memory transports for testing
//!
//! Both mocks record everything they are handed and let the test script the
//! outcome. Clones share state, so a test can keep one handle while the queue
//! owns another.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use funnel_events::{EventQueue, MockBatchTransport, MockBehavior, QueueConfig};
//!
//! let transport = MockBatchTransport::new();
//! let queue = EventQueue::builder(QueueConfig::default())
//!     .transport(transport.clone())
//!     .build()?;
//!
//! transport.set_behavior(MockBehavior::Fail);
//! queue.track("lp_view");
//! queue.flush().await;
//! assert_eq!(queue.len(), 1);
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::TransportError;
use crate::record::EventBatch;
use crate::transport::{BatchTransport, BeaconTransport};

/// Scripted outcome of a mock batch send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Every send succeeds
    Succeed,
    /// Every send fails with a 503
    Fail,
    /// The next `n` sends fail, later ones succeed
    FailTimes(usize),
    /// Sends never complete
    Hang,
}

struct MockBatchState {
    behavior: MockBehavior,
    latency: Option<Duration>,
    received: Vec<EventBatch>,
    delivered: Vec<EventBatch>,
}

/// Batch transport that records every batch it receives
#[derive(Clone)]
pub struct MockBatchTransport {
    state: Arc<Mutex<MockBatchState>>,
    /// Number of sends that started
    started: Arc<watch::Sender<usize>>,
    /// Number of sends that returned (either way)
    completed: Arc<watch::Sender<usize>>,
    /// Sends wait here until the gate is open
    gate: Arc<watch::Sender<bool>>,
}

impl MockBatchTransport {
    /// Create a transport that accepts everything
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::Succeed)
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        let (started, _) = watch::channel(0);
        let (completed, _) = watch::channel(0);
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(MockBatchState {
                behavior,
                latency: None,
                received: Vec::new(),
                delivered: Vec::new(),
            })),
            started: Arc::new(started),
            completed: Arc::new(completed),
            gate: Arc::new(gate),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        self.state.lock().behavior = behavior;
    }

    /// Delay every send by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Hold sends in flight until [`release`](Self::release) is called
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Every batch handed to the transport, in order
    pub fn batches(&self) -> Vec<EventBatch> {
        self.state.lock().received.clone()
    }

    /// Batches that were acknowledged
    pub fn delivered(&self) -> Vec<EventBatch> {
        self.state.lock().delivered.clone()
    }

    /// Event types of all acknowledged records, in delivery order
    pub fn delivered_event_types(&self) -> Vec<String> {
        self.state
            .lock()
            .delivered
            .iter()
            .flat_map(|batch| batch.events.iter().map(|r| r.event_type.clone()))
            .collect()
    }

    pub fn send_count(&self) -> usize {
        *self.started.borrow()
    }

    /// Wait until at least `n` sends have started
    pub async fn wait_for_sends(&self, n: usize) {
        let mut rx = self.started.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Wait until at least `n` sends have returned
    pub async fn wait_for_completions(&self, n: usize) {
        let mut rx = self.completed.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    fn next_result(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        match state.behavior {
            MockBehavior::Succeed | MockBehavior::Hang => Ok(()),
            MockBehavior::Fail => Err(TransportError::Status {
                status: 503,
                body: "mock failure".into(),
            }),
            MockBehavior::FailTimes(n) => {
                state.behavior = if n <= 1 {
                    MockBehavior::Succeed
                } else {
                    MockBehavior::FailTimes(n - 1)
                };
                Err(TransportError::Network("mock connection reset".into()))
            }
        }
    }
}

impl Default for MockBatchTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchTransport for MockBatchTransport {
    async fn send_batch(&self, batch: &EventBatch) -> Result<(), TransportError> {
        let (behavior, latency) = {
            let mut state = self.state.lock();
            state.received.push(batch.clone());
            (state.behavior, state.latency)
        };
        self.started.send_modify(|count| *count += 1);

        if behavior == MockBehavior::Hang {
            std::future::pending::<()>().await;
        }

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.next_result();
        if result.is_ok() {
            self.state.lock().delivered.push(batch.clone());
        }
        self.completed.send_modify(|count| *count += 1);
        result
    }
}

/// Beacon transport that records payloads
#[derive(Clone)]
pub struct MockBeaconTransport {
    calls: Arc<Mutex<Vec<(String, Bytes)>>>,
    accept: Arc<Mutex<bool>>,
}

impl MockBeaconTransport {
    /// Create a beacon that accepts every payload
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            accept: Arc::new(Mutex::new(true)),
        }
    }

    /// Create a beacon that rejects every payload
    pub fn rejecting() -> Self {
        let beacon = Self::new();
        beacon.set_accept(false);
        beacon
    }

    pub fn set_accept(&self, accept: bool) {
        *self.accept.lock() = accept;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Target URLs in call order
    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    /// Decoded payloads in call order
    pub fn batches(&self) -> Vec<EventBatch> {
        self.calls
            .lock()
            .iter()
            .filter_map(|(_, body)| serde_json::from_slice(body).ok())
            .collect()
    }
}

impl Default for MockBeaconTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BeaconTransport for MockBeaconTransport {
    fn send_beacon(&self, url: &str, body: Bytes) -> Result<(), TransportError> {
        self.calls.lock().push((url.to_string(), body));
        if *self.accept.lock() {
            Ok(())
        } else {
            Err(TransportError::Rejected("mock beacon refused".into()))
        }
    }
}
