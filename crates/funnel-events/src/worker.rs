//! Background flush task
//!
//! Handles:
//! - Periodic flushes while online and non-empty
//! - Immediate flush on an offline→online transition
//! - Beacon flush when the page is hidden or unloaded
//!
//! The task never awaits a delivery itself. Each trigger swaps out a snapshot
//! and spawns the send, so a slow endpoint never delays shutdown or the next
//! lifecycle notification.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::environment::PageLifecycle;
use crate::queue::Shared;

pub(crate) struct FlushTask {
    shared: Arc<Shared>,
    network_rx: watch::Receiver<bool>,
    lifecycle_rx: Option<broadcast::Receiver<PageLifecycle>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl FlushTask {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        lifecycle_rx: Option<broadcast::Receiver<PageLifecycle>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self {
            network_rx: shared.network.subscribe(),
            shared,
            lifecycle_rx,
            shutdown_rx,
        };

        tokio::spawn(task.run())
    }

    async fn run(mut self) {
        let period = self.shared.flush_interval();
        debug!(interval_ms = period.as_millis() as u64, "Flush task started");

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut was_online = *self.network_rx.borrow_and_update();
        let mut network_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    debug!("Flush task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.shared.trigger_flush();
                }
                changed = self.network_rx.changed(), if network_open => {
                    if changed.is_err() {
                        // Provider went away; keep the last known state.
                        network_open = false;
                        continue;
                    }
                    let online = *self.network_rx.borrow_and_update();
                    if online && !was_online {
                        info!("Back online, flushing queued events");
                        self.shared.trigger_flush();
                    } else if !online && was_online {
                        info!("Went offline, holding events");
                    }
                    was_online = online;
                }
                event = next_lifecycle(&mut self.lifecycle_rx) => {
                    match event {
                        Ok(event) if event.is_teardown() => {
                            debug!(?event, "Page going away, flushing via beacon");
                            self.shared.flush_with_beacon();
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Missed page lifecycle notifications");
                            self.shared.flush_with_beacon();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            self.lifecycle_rx = None;
                        }
                    }
                }
            }
        }
    }
}

/// Next lifecycle notification, or never when there is no notifier
async fn next_lifecycle(
    rx: &mut Option<broadcast::Receiver<PageLifecycle>>,
) -> Result<PageLifecycle, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
