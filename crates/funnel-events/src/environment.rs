//! Host environment capabilities consumed by the queue
//!
//! The queue only needs to know whether the device is online, when the page
//! is about to disappear, and what time it is. Each of those is a small trait
//! so the flush/retry logic can run without a browser-like host.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

/// Reports connectivity and its transitions
pub trait NetworkStatusProvider: Send + Sync {
    /// Current connectivity as last reported by the host
    fn is_online(&self) -> bool;

    /// Receiver that observes every connectivity change
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Page lifecycle transitions relevant to delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageLifecycle {
    /// The page became visible again
    Visible,
    /// The page was hidden (tab switch, app backgrounded)
    Hidden,
    /// The page is being unloaded
    Unload,
}

impl PageLifecycle {
    /// Whether the page may disappear without warning after this transition
    pub fn is_teardown(&self) -> bool {
        matches!(self, PageLifecycle::Hidden | PageLifecycle::Unload)
    }
}

/// Source of page lifecycle notifications
pub trait PageLifecycleNotifier: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<PageLifecycle>;
}

/// Wall clock used to timestamp events
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Provider that never goes offline
pub struct AlwaysOnline {
    tx: watch::Sender<bool>,
}

impl AlwaysOnline {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }
}

impl Default for AlwaysOnline {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStatusProvider for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Settable connectivity state, fed by whatever the host observes
///
/// Cloning shares the same underlying state.
#[derive(Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Record a connectivity change
    ///
    /// Subscribers are only woken when the value actually changes.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

impl NetworkStatusProvider for NetworkMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Broadcasts page lifecycle transitions to every subscribed queue
#[derive(Clone)]
pub struct LifecycleBroadcaster {
    tx: broadcast::Sender<PageLifecycle>,
}

impl LifecycleBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    /// Publish a transition, returning how many subscribers will see it
    pub fn notify(&self, event: PageLifecycle) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for LifecycleBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl PageLifecycleNotifier for LifecycleBroadcaster {
    fn subscribe(&self) -> broadcast::Receiver<PageLifecycle> {
        self.tx.subscribe()
    }
}

/// The real wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
