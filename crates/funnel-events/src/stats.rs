//! Delivery counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a queue's delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Events accepted by `add`
    pub events_queued: u64,
    /// Events evicted by the soft cap
    pub events_dropped: u64,
    /// Events acknowledged by the batch transport
    pub events_delivered: u64,
    /// Batch sends started
    pub flush_attempts: u64,
    /// Batch sends acknowledged
    pub batches_delivered: u64,
    /// Batch sends that failed and were re-queued
    pub batches_failed: u64,
    /// Payloads accepted by the beacon transport
    pub beacons_sent: u64,
    /// Beacon attempts that fell back to the batch transport
    pub beacon_fallbacks: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    events_queued: AtomicU64,
    events_dropped: AtomicU64,
    events_delivered: AtomicU64,
    flush_attempts: AtomicU64,
    batches_delivered: AtomicU64,
    batches_failed: AtomicU64,
    beacons_sent: AtomicU64,
    beacon_fallbacks: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_queued(&self) {
        self.events_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: usize) {
        self.events_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.flush_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, events: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.events_delivered.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_beacon(&self) {
        self.beacons_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_beacon_fallback(&self) {
        self.beacon_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        QueueStats {
            events_queued: self.events_queued.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            flush_attempts: self.flush_attempts.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            beacons_sent: self.beacons_sent.load(Ordering::Relaxed),
            beacon_fallbacks: self.beacon_fallbacks.load(Ordering::Relaxed),
        }
    }
}
