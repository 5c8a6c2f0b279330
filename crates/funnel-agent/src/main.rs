use std::time::Duration;

use clap::Parser;
use funnel_agent::{Agent, AgentConfig, Cli, Control};
use funnel_events::{
    EventQueue, HttpBatchTransport, HttpBeaconTransport, LifecycleBroadcaster, NetworkMonitor,
};
use funnel_logging::{FunnelSubscriberBuilder, session_span};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{Instrument, info, warn};

/// Beacon requests are detached tasks; give them a moment before the runtime stops
const BEACON_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::resolve(&cli)?;

    let _log_guard = FunnelSubscriberBuilder::new()
        .with_config(config.logging.clone())
        .init()?;

    let mut batch = HttpBatchTransport::new(
        config.queue.endpoint_url.clone(),
        config.queue.request_timeout,
    )?;
    let mut beacon = HttpBeaconTransport::new().with_max_bytes(config.queue.max_beacon_bytes);
    if let Some(api_key) = &config.api_key {
        batch = batch.with_api_key(api_key.clone());
        beacon = beacon.with_api_key(api_key.clone());
    }

    let network = NetworkMonitor::new(true);
    let lifecycle = LifecycleBroadcaster::new();
    let queue = EventQueue::builder(config.queue.clone())
        .transport(batch)
        .beacon(beacon)
        .network(network.clone())
        .lifecycle(lifecycle.clone())
        .page_context(config.page.clone())
        .build()?;

    let span = session_span(queue.session_id());
    let agent = Agent::new(queue, network, lifecycle);

    async {
        let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &cli.input {
            Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
            None => Box::new(BufReader::new(tokio::io::stdin())),
        };

        tokio::select! {
            result = agent.ingest(reader) => {
                let summary = result?;
                info!(
                    lines = summary.lines,
                    events = summary.events,
                    malformed = summary.malformed,
                    "Input exhausted"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, handing queued events to the beacon");
                agent.apply(Control::Unload).await;
                tokio::time::sleep(BEACON_GRACE).await;
            }
        }

        let outcome = agent.queue().shutdown().await;
        let stats = agent.queue().stats();
        info!(
            ?outcome,
            delivered = stats.events_delivered,
            dropped = stats.events_dropped,
            left = agent.queue().len(),
            "Agent stopped"
        );
        anyhow::Ok(())
    }
    .instrument(span)
    .await
}
