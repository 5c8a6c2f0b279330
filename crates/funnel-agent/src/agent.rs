//! Feeds parsed input into the queue and the simulated host

use funnel_events::{EventQueue, LifecycleBroadcaster, NetworkMonitor, PageLifecycle};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::input::{AgentCommand, Control, parse_line};

/// Counts for one pass over the input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub lines: usize,
    pub events: usize,
    pub controls: usize,
    pub malformed: usize,
}

/// The queue together with the host signals it listens to
pub struct Agent {
    queue: EventQueue,
    network: NetworkMonitor,
    lifecycle: LifecycleBroadcaster,
}

impl Agent {
    pub fn new(queue: EventQueue, network: NetworkMonitor, lifecycle: LifecycleBroadcaster) -> Self {
        Self {
            queue,
            network,
            lifecycle,
        }
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Read every line until EOF; malformed lines are logged and skipped
    pub async fn ingest<R>(&self, reader: R) -> std::io::Result<IngestSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = IngestSummary::default();
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            summary.lines += 1;
            match parse_line(summary.lines, &line) {
                Ok(Some(AgentCommand::Event(event))) => {
                    summary.events += 1;
                    self.queue
                        .add(event.event_type, event.event_data, event.lead_id);
                }
                Ok(Some(AgentCommand::Control { control })) => {
                    summary.controls += 1;
                    self.apply(control).await;
                }
                Ok(None) => {}
                Err(e) => {
                    summary.malformed += 1;
                    warn!(error = %e, "Skipping malformed input line");
                }
            }
        }

        Ok(summary)
    }

    /// Apply one host transition
    pub async fn apply(&self, control: Control) {
        debug!(?control, "Applying control");
        match control {
            Control::Online => self.network.set_online(true),
            Control::Offline => self.network.set_online(false),
            Control::Visible => self.notify(PageLifecycle::Visible),
            Control::Hidden => self.notify(PageLifecycle::Hidden),
            Control::Unload => self.notify(PageLifecycle::Unload),
            Control::Flush => {
                let outcome = self.queue.flush().await;
                info!(?outcome, "Explicit flush");
            }
        }
    }

    fn notify(&self, event: PageLifecycle) {
        if self.lifecycle.notify(event) == 0 {
            warn!(?event, "No lifecycle listener");
        }
    }
}
