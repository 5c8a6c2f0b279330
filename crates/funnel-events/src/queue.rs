//! The client-side event queue
//!
//! Events are buffered in memory and delivered to the batch endpoint in
//! batches, from three triggers: the queue reaching `batch_size`, the
//! periodic timer, and an offline→online transition. Page teardown hands the
//! remaining events to the beacon transport instead.
//!
//! Every delivery works on a snapshot swapped out of the live queue under a
//! short synchronous lock, so overlapping flushes never see the same event
//! and events added while a request is in flight land in the fresh queue. A
//! failed snapshot goes back to the head of the live queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::environment::{
    AlwaysOnline, Clock, NetworkStatusProvider, PageLifecycleNotifier, SystemClock,
};
use crate::error::{QueueError, QueueResult, TransportError};
use crate::event::{EventData, LeadId, QueuedEvent};
use crate::record::{EventBatch, PageContext};
use crate::stats::{QueueStats, StatsCounters};
use crate::transport::{BatchTransport, BeaconTransport, HttpBatchTransport};
use crate::worker::FlushTask;

/// Why a flush did not send anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing was queued
    Empty,
    /// The network provider reported offline
    Offline,
    /// The queue was already shut down
    ShutDown,
}

/// What a flush did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Skipped(SkipReason),
    /// The batch was acknowledged
    Delivered { events: usize },
    /// The batch failed and went back to the head of the queue
    Requeued { events: usize },
}

impl FlushOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, FlushOutcome::Delivered { .. })
    }
}

/// State shared between the queue handle, its background task and spawned
/// deliveries
pub(crate) struct Shared {
    config: QueueConfig,
    events: Mutex<VecDeque<QueuedEvent>>,
    page: RwLock<PageContext>,
    session_id: String,
    transport: Arc<dyn BatchTransport>,
    beacon: Option<Arc<dyn BeaconTransport>>,
    pub(crate) network: Arc<dyn NetworkStatusProvider>,
    clock: Arc<dyn Clock>,
    stats: StatsCounters,
    runtime: Handle,
}

impl Shared {
    /// Append an event, evicting the oldest ones beyond the soft cap
    ///
    /// Returns the queue length before and after the append.
    fn push(&self, event: QueuedEvent) -> (usize, usize) {
        let (before, after, dropped) = {
            let mut events = self.events.lock();
            let before = events.len();
            events.push_back(event);
            let dropped = evict_oldest(&mut events, self.config.max_queued_events);
            (before, events.len(), dropped)
        };

        self.stats.record_queued();
        if dropped > 0 {
            self.stats.record_dropped(dropped);
            warn!(
                dropped,
                cap = self.config.max_queued_events,
                "Event queue over capacity, dropped oldest events"
            );
        }
        (before, after)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub(crate) fn flush_interval(&self) -> Duration {
        self.config.flush_interval
    }

    fn take_all(&self) -> Vec<QueuedEvent> {
        std::mem::take(&mut *self.events.lock()).into()
    }

    /// Put a failed snapshot back ahead of anything queued since
    fn requeue_front(&self, snapshot: Vec<QueuedEvent>) {
        let dropped = {
            let mut events = self.events.lock();
            let newer = std::mem::take(&mut *events);
            events.extend(snapshot);
            events.extend(newer);
            evict_oldest(&mut events, self.config.max_queued_events)
        };

        if dropped > 0 {
            self.stats.record_dropped(dropped);
            warn!(
                dropped,
                cap = self.config.max_queued_events,
                "Re-queued batch exceeded capacity, dropped oldest events"
            );
        }
    }

    /// Swap out the live queue if a flush should happen now
    pub(crate) fn begin_flush(&self) -> Result<Vec<QueuedEvent>, SkipReason> {
        if self.is_empty() {
            return Err(SkipReason::Empty);
        }
        if !self.network.is_online() {
            return Err(SkipReason::Offline);
        }
        let snapshot = self.take_all();
        if snapshot.is_empty() {
            return Err(SkipReason::Empty);
        }
        Ok(snapshot)
    }

    fn build_batch(&self, snapshot: &[QueuedEvent]) -> EventBatch {
        let page = self.page.read().clone();
        let fallback = self
            .config
            .stamp_session_id
            .then_some(self.session_id.as_str());
        EventBatch::from_events(snapshot, &page, fallback)
    }

    /// Send a snapshot through the batch transport
    async fn deliver(&self, snapshot: Vec<QueuedEvent>) -> FlushOutcome {
        let count = snapshot.len();
        let batch = self.build_batch(&snapshot);
        self.stats.record_attempt();

        let timeout = self.config.request_timeout;
        let result = match tokio::time::timeout(timeout, self.transport.send_batch(&batch)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        };

        match result {
            Ok(()) => {
                self.stats.record_delivered(count);
                debug!(events = count, "Flushed event batch");
                FlushOutcome::Delivered { events: count }
            }
            Err(e) => {
                self.stats.record_failed();
                warn!(
                    events = count,
                    error = %e,
                    transient = e.is_transient(),
                    "Event batch delivery failed, re-queued"
                );
                self.requeue_front(snapshot);
                FlushOutcome::Requeued { events: count }
            }
        }
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub(crate) async fn flush(&self) -> FlushOutcome {
        match self.begin_flush() {
            Ok(snapshot) => self.deliver(snapshot).await,
            Err(reason) => FlushOutcome::Skipped(reason),
        }
    }

    /// Deliver a snapshot in the background
    pub(crate) fn spawn_delivery(self: &Arc<Self>, snapshot: Vec<QueuedEvent>) {
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            shared.deliver(snapshot).await;
        });
    }

    /// Start a flush without waiting for the request
    pub(crate) fn trigger_flush(self: &Arc<Self>) {
        if let Ok(snapshot) = self.begin_flush() {
            self.spawn_delivery(snapshot);
        }
    }

    pub(crate) fn flush_with_beacon(self: &Arc<Self>) {
        let snapshot = self.take_all();
        if snapshot.is_empty() {
            return;
        }

        let count = snapshot.len();
        let batch = self.build_batch(&snapshot);
        let max = self.config.max_beacon_bytes;
        let sent = match &self.beacon {
            Some(beacon) => batch.to_body().and_then(|body| {
                if body.len() > max {
                    return Err(TransportError::PayloadTooLarge {
                        size: body.len(),
                        max,
                    });
                }
                beacon.send_beacon(self.config.beacon_target(), body)
            }),
            None => Err(TransportError::Unavailable("no beacon transport".into())),
        };

        match sent {
            Ok(()) => {
                self.stats.record_beacon();
                debug!(events = count, "Handed events to beacon transport");
            }
            Err(e) => {
                self.stats.record_beacon_fallback();
                warn!(
                    events = count,
                    error = %e,
                    "Beacon unavailable, falling back to batch transport"
                );
                self.spawn_delivery(snapshot);
            }
        }
    }
}

/// Drop the oldest events beyond `cap`, returning how many were dropped
fn evict_oldest(events: &mut VecDeque<QueuedEvent>, cap: usize) -> usize {
    let overflow = events.len().saturating_sub(cap);
    events.drain(..overflow);
    overflow
}

/// Handle on the background flush task
struct Worker {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Buffers funnel events and delivers them to the batch endpoint
///
/// Built once by the application's composition root with
/// [`EventQueue::builder`] and shared by reference (or behind an `Arc`) with
/// whatever records events. [`add`](Self::add) never blocks, never fails and
/// never panics.
pub struct EventQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl EventQueue {
    pub fn builder(config: QueueConfig) -> EventQueueBuilder {
        EventQueueBuilder::new(config)
    }

    /// Record an event
    ///
    /// When the queue reaches `batch_size`, the batch is swapped out right
    /// away and sent in the background. A backlog already at or above
    /// `batch_size` (a failed batch put back) is left to the timer and the
    /// reconnect flush. After shutdown events are only buffered.
    pub fn add(&self, event_type: impl Into<String>, event_data: EventData, lead_id: Option<LeadId>) {
        let event_type = event_type.into();
        if event_type.is_empty() {
            warn!("Ignoring event with empty event_type");
            return;
        }

        let event = QueuedEvent::new(event_type, event_data, lead_id, self.shared.clock.now());
        let (before, after) = self.shared.push(event);

        // Only the crossing triggers; a re-queued backlog waits for the timer.
        let batch_size = self.shared.config.batch_size;
        if before < batch_size && after >= batch_size && self.is_running() {
            self.shared.trigger_flush();
        }
    }

    /// Record an event with no attributes
    pub fn track(&self, event_type: impl Into<String>) {
        self.add(event_type, EventData::new(), None);
    }

    /// Record an event with no attributes for a known lead
    pub fn track_for_lead(&self, event_type: impl Into<String>, lead_id: impl Into<LeadId>) {
        self.add(event_type, EventData::new(), Some(lead_id.into()));
    }

    /// Deliver everything queued so far
    ///
    /// Does nothing when the queue is empty or the device is offline. A
    /// failed batch is put back at the head of the queue; the error is logged,
    /// never returned.
    pub async fn flush(&self) -> FlushOutcome {
        self.shared.flush().await
    }

    /// Hand everything queued to the beacon transport
    ///
    /// Meant for the instant the page is hidden or unloaded. The queue is
    /// empty when this returns; if the beacon is missing or refuses the
    /// payload, the events go out through the batch transport in the
    /// background instead.
    pub fn flush_with_beacon(&self) {
        self.shared.flush_with_beacon();
    }

    /// Stop the timer and listeners, then flush one last time
    ///
    /// Only the first call flushes. An in-flight background send is not
    /// cancelled.
    pub async fn shutdown(&self) -> FlushOutcome {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return FlushOutcome::Skipped(SkipReason::ShutDown);
        };

        let _ = worker.shutdown_tx.send(());
        if let Err(e) = worker.handle.await {
            warn!(error = %e, "Flush task ended abnormally");
        }

        let outcome = self.shared.flush().await;
        info!(?outcome, remaining = self.len(), "Event queue shut down");
        outcome
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn set_page_context(&self, page: PageContext) {
        *self.shared.page.write() = page;
    }

    pub fn page_context(&self) -> PageContext {
        self.shared.page.read().clone()
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn len(&self) -> usize {
        self.shared.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    /// Copy of the queued events, oldest first
    pub fn snapshot(&self) -> Vec<QueuedEvent> {
        self.shared.events.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats.snapshot()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.shutdown_tx.send(());
        }
    }
}

/// Wires an [`EventQueue`] to its collaborators
pub struct EventQueueBuilder {
    config: QueueConfig,
    transport: Option<Arc<dyn BatchTransport>>,
    beacon: Option<Arc<dyn BeaconTransport>>,
    network: Option<Arc<dyn NetworkStatusProvider>>,
    lifecycle: Option<Arc<dyn PageLifecycleNotifier>>,
    clock: Option<Arc<dyn Clock>>,
    page: PageContext,
}

impl EventQueueBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            transport: None,
            beacon: None,
            network: None,
            lifecycle: None,
            clock: None,
            page: PageContext::default(),
        }
    }

    /// Batch transport (default: HTTP to `endpoint_url`)
    pub fn transport(mut self, transport: impl BatchTransport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Beacon transport (default: none, teardown flushes use the batch transport)
    pub fn beacon(mut self, beacon: impl BeaconTransport + 'static) -> Self {
        self.beacon = Some(Arc::new(beacon));
        self
    }

    /// Connectivity source (default: always online)
    pub fn network(mut self, network: impl NetworkStatusProvider + 'static) -> Self {
        self.network = Some(Arc::new(network));
        self
    }

    /// Page lifecycle source (default: none)
    pub fn lifecycle(mut self, lifecycle: impl PageLifecycleNotifier + 'static) -> Self {
        self.lifecycle = Some(Arc::new(lifecycle));
        self
    }

    /// Clock used to timestamp events (default: system clock)
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn page_context(mut self, page: PageContext) -> Self {
        self.page = page;
        self
    }

    /// Build the queue and start its background task
    ///
    /// # Errors
    ///
    /// Fails on a configuration with fatal warnings, when called outside a
    /// tokio runtime, or when the default HTTP transport cannot be created.
    pub fn build(self) -> QueueResult<EventQueue> {
        let fatal = self.config.fatal_warnings();
        if !fatal.is_empty() {
            return Err(QueueError::InvalidConfig(fatal));
        }
        for warning in self.config.validate() {
            warn!(%warning, "Questionable event queue configuration");
        }

        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        let transport: Arc<dyn BatchTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpBatchTransport::new(
                self.config.endpoint_url.clone(),
                self.config.request_timeout,
            )?),
        };

        let session_id = self
            .config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let shared = Arc::new(Shared {
            events: Mutex::new(VecDeque::with_capacity(self.config.batch_size)),
            page: RwLock::new(self.page),
            session_id,
            transport,
            beacon: self.beacon,
            network: self.network.unwrap_or_else(|| Arc::new(AlwaysOnline::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            stats: StatsCounters::default(),
            runtime,
            config: self.config,
        });

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let lifecycle_rx = self.lifecycle.as_ref().map(|notifier| notifier.subscribe());
        let handle = FlushTask::spawn(Arc::clone(&shared), lifecycle_rx, shutdown_rx);

        info!(
            session_id = %shared.session_id,
            batch_size = shared.config.batch_size,
            interval_ms = shared.config.flush_interval.as_millis() as u64,
            "Event queue started"
        );

        Ok(EventQueue {
            shared,
            worker: Mutex::new(Some(Worker {
                shutdown_tx,
                handle,
            })),
        })
    }
}
