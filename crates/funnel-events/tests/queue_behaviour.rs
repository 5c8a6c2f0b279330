//! Event Queue Behaviour Tests
//!
//! Exercises the queue end to end against in-memory transports:
//! - Batching and the automatic flush at `batch_size`
//! - Offline handling and recovery on reconnect
//! - Re-queue ordering after failed deliveries
//! - Beacon delivery at page teardown and its fallback
//! - Shutdown semantics and the soft cap
//! - Configuration the background task cannot run with
//!
//! Timer-driven tests run with a paused clock so intervals elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use funnel_events::{
    ConfigWarning, EventData, EventQueue, EventQueueBuilder, FlushOutcome, LifecycleBroadcaster,
    ManualClock, MockBatchTransport, MockBeaconTransport, MockBehavior, NetworkMonitor,
    PageContext, PageLifecycle, QueueConfig, QueueError, SkipReason, event_data,
};

// ============================================================================
// Helpers
// ============================================================================

/// Config with a timer slow enough to stay out of the way
fn quiet_config() -> QueueConfig {
    QueueConfig {
        flush_interval: Duration::from_secs(3600),
        ..QueueConfig::default()
    }
}

fn builder(transport: &MockBatchTransport) -> EventQueueBuilder {
    EventQueue::builder(quiet_config()).transport(transport.clone())
}

fn queued_types(queue: &EventQueue) -> Vec<String> {
    queue
        .snapshot()
        .iter()
        .map(|e| e.event_type().to_string())
        .collect()
}

/// Let spawned tasks run; with a paused clock this only moves time once
/// everything is idle
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn test_two_page_views_flushed_as_one_batch() {
    let transport = MockBatchTransport::new();
    let queue = builder(&transport).build().unwrap();

    queue.add("lp_view", EventData::new(), None);
    queue.add("lp_view", EventData::new(), None);
    let outcome = queue.flush().await;

    assert_eq!(outcome, FlushOutcome::Delivered { events: 2 });
    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert!(batches[0].events.iter().all(|r| r.event_type == "lp_view"));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_adds_keep_call_order() {
    let transport = MockBatchTransport::new();
    let queue = builder(&transport).build().unwrap();

    for step in ["lp_view", "quiz_start", "quiz_answer", "vsl_play"] {
        queue.track(step);
    }

    assert_eq!(queue.len(), 4);
    assert_eq!(
        queued_types(&queue),
        vec!["lp_view", "quiz_start", "quiz_answer", "vsl_play"]
    );
    assert_eq!(transport.send_count(), 0);
}

#[tokio::test]
async fn test_tenth_add_triggers_one_flush() {
    let transport = MockBatchTransport::new();
    let queue = builder(&transport).build().unwrap();

    for i in 0..9 {
        queue.add("quiz_answer", event_data! { "question" => i }, None);
    }
    settle().await;
    assert_eq!(queue.len(), 9);
    assert_eq!(transport.send_count(), 0);

    queue.add("quiz_answer", event_data! { "question" => 9 }, None);
    // The batch is swapped out before add returns
    assert!(queue.is_empty());

    transport.wait_for_completions(1).await;
    assert_eq!(transport.send_count(), 1);
    assert_eq!(transport.delivered()[0].len(), 10);
    assert_eq!(queue.stats().flush_attempts, 1);

    queue.track("booking_view");
    assert_eq!(queue.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_endpoint_leaves_backlog_to_timer() {
    let transport = MockBatchTransport::with_behavior(MockBehavior::Fail);
    let queue = builder(&transport).build().unwrap();

    for i in 0..10 {
        queue.track(format!("first{i}"));
    }
    transport.wait_for_completions(1).await;
    settle().await;
    assert_eq!(queue.len(), 10);

    for i in 0..10 {
        queue.track(format!("second{i}"));
    }
    settle().await;
    assert_eq!(transport.send_count(), 1);
    assert_eq!(queue.len(), 20);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    transport.wait_for_sends(2).await;
    assert_eq!(transport.batches()[1].len(), 20);
}

#[tokio::test]
async fn test_zero_flush_interval_is_rejected() {
    let transport = MockBatchTransport::new();
    let result = EventQueue::builder(QueueConfig {
        flush_interval: Duration::ZERO,
        ..QueueConfig::default()
    })
    .transport(transport.clone())
    .build();

    match result {
        Err(QueueError::InvalidConfig(warnings)) => {
            assert!(warnings.contains(&ConfigWarning::ZeroFlushInterval));
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("zero flush interval accepted"),
    }
}

// ============================================================================
// Offline handling
// ============================================================================

#[tokio::test]
async fn test_flush_while_offline_leaves_queue_untouched() {
    let transport = MockBatchTransport::new();
    let network = NetworkMonitor::new(false);
    let queue = builder(&transport).network(network).build().unwrap();

    queue.track("lp_view");
    queue.track("cta_click");
    let outcome = queue.flush().await;

    assert_eq!(outcome, FlushOutcome::Skipped(SkipReason::Offline));
    assert_eq!(queued_types(&queue), vec!["lp_view", "cta_click"]);
    assert_eq!(transport.send_count(), 0);
}

#[tokio::test]
async fn test_flush_on_empty_queue_is_skipped() {
    let transport = MockBatchTransport::new();
    let queue = builder(&transport).build().unwrap();

    assert_eq!(queue.flush().await, FlushOutcome::Skipped(SkipReason::Empty));
    assert_eq!(transport.send_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_flushes_without_waiting_for_timer() {
    let transport = MockBatchTransport::new();
    let network = NetworkMonitor::new(false);
    let queue = builder(&transport)
        .network(network.clone())
        .build()
        .unwrap();

    queue.track("quiz_complete");
    settle().await;
    assert_eq!(transport.send_count(), 0);

    network.set_online(true);
    transport.wait_for_completions(1).await;

    assert!(queue.is_empty());
    assert_eq!(transport.delivered_event_types(), vec!["quiz_complete"]);
}

#[tokio::test(start_paused = true)]
async fn test_timer_holds_events_while_offline() {
    let transport = MockBatchTransport::new();
    let network = NetworkMonitor::new(false);
    let queue = EventQueue::builder(QueueConfig::default())
        .transport(transport.clone())
        .network(network)
        .build()
        .unwrap();

    queue.track("lp_view");
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(queue.len(), 1);
    assert_eq!(transport.send_count(), 0);
}

// ============================================================================
// Periodic timer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timer_flushes_partial_batch() {
    let transport = MockBatchTransport::new();
    let queue = EventQueue::builder(QueueConfig::default())
        .transport(transport.clone())
        .build()
        .unwrap();

    queue.track("lp_view");
    queue.track("cta_click");
    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(transport.send_count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    transport.wait_for_completions(1).await;

    assert!(queue.is_empty());
    assert_eq!(transport.delivered()[0].len(), 2);
}

// ============================================================================
// Failure and re-queue
// ============================================================================

#[tokio::test]
async fn test_failed_flush_then_successful_retry() {
    let transport = MockBatchTransport::with_behavior(MockBehavior::Fail);
    let queue = builder(&transport).build().unwrap();

    queue.add("x", EventData::new(), None);
    assert_eq!(queue.flush().await, FlushOutcome::Requeued { events: 1 });
    assert_eq!(queue.len(), 1);

    transport.set_behavior(MockBehavior::Succeed);
    assert_eq!(queue.flush().await, FlushOutcome::Delivered { events: 1 });
    assert!(queue.is_empty());

    let stats = queue.stats();
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.batches_delivered, 1);
    assert_eq!(stats.events_delivered, 1);
}

#[tokio::test]
async fn test_failed_batch_goes_ahead_of_events_added_in_flight() {
    let transport = MockBatchTransport::with_behavior(MockBehavior::Fail);
    let queue = Arc::new(builder(&transport).build().unwrap());

    queue.track("a");
    queue.track("b");
    transport.hold();

    let in_flight = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.flush().await }
    });
    transport.wait_for_sends(1).await;

    queue.track("during");
    assert_eq!(queued_types(&queue), vec!["during"]);

    transport.release();
    let outcome = in_flight.await.unwrap();

    assert_eq!(outcome, FlushOutcome::Requeued { events: 2 });
    assert_eq!(queued_types(&queue), vec!["a", "b", "during"]);
}

#[tokio::test]
async fn test_successful_batch_keeps_events_added_in_flight() {
    let transport = MockBatchTransport::new();
    let queue = Arc::new(builder(&transport).build().unwrap());

    queue.track("a");
    transport.hold();

    let in_flight = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.flush().await }
    });
    transport.wait_for_sends(1).await;
    queue.track("during");

    transport.release();
    assert!(in_flight.await.unwrap().is_delivered());

    assert_eq!(transport.delivered_event_types(), vec!["a"]);
    assert_eq!(queued_types(&queue), vec!["during"]);
}

#[tokio::test]
async fn test_overlapping_flushes_send_disjoint_batches() {
    let transport = MockBatchTransport::new();
    let queue = Arc::new(builder(&transport).build().unwrap());

    queue.track("a");
    queue.track("b");
    transport.hold();

    let first = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.flush().await }
    });
    transport.wait_for_sends(1).await;

    queue.track("c");
    let second = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.flush().await }
    });
    transport.wait_for_sends(2).await;

    transport.release();
    assert_eq!(first.await.unwrap(), FlushOutcome::Delivered { events: 2 });
    assert_eq!(second.await.unwrap(), FlushOutcome::Delivered { events: 1 });

    let mut delivered = transport.delivered_event_types();
    delivered.sort();
    assert_eq!(delivered, vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let transport = MockBatchTransport::with_behavior(MockBehavior::Hang);
    let config = QueueConfig {
        request_timeout: Duration::from_secs(2),
        ..quiet_config()
    };
    let queue = EventQueue::builder(config)
        .transport(transport.clone())
        .build()
        .unwrap();

    queue.track("booking_submitted");
    assert_eq!(queue.flush().await, FlushOutcome::Requeued { events: 1 });
    assert_eq!(queued_types(&queue), vec!["booking_submitted"]);
}

// ============================================================================
// Soft cap
// ============================================================================

#[tokio::test]
async fn test_soft_cap_drops_oldest() {
    let transport = MockBatchTransport::new();
    let config = QueueConfig {
        max_queued_events: 20,
        ..quiet_config()
    };
    let queue = EventQueue::builder(config)
        .transport(transport.clone())
        .network(NetworkMonitor::new(false))
        .build()
        .unwrap();

    for i in 0..25 {
        queue.track(format!("e{i}"));
    }

    let queued = queued_types(&queue);
    assert_eq!(queued.len(), 20);
    assert_eq!(queued.first().map(String::as_str), Some("e5"));
    assert_eq!(queued.last().map(String::as_str), Some("e24"));
    assert_eq!(queue.stats().events_dropped, 5);
}

#[tokio::test]
async fn test_requeue_respects_soft_cap() {
    let transport = MockBatchTransport::with_behavior(MockBehavior::Fail);
    let config = QueueConfig {
        max_queued_events: 12,
        ..quiet_config()
    };
    let queue = Arc::new(
        EventQueue::builder(config)
            .transport(transport.clone())
            .build()
            .unwrap(),
    );

    for i in 0..8 {
        queue.track(format!("e{i}"));
    }
    transport.hold();
    let in_flight = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.flush().await }
    });
    transport.wait_for_sends(1).await;

    for i in 0..6 {
        queue.track(format!("d{i}"));
    }
    transport.release();
    assert_eq!(in_flight.await.unwrap(), FlushOutcome::Requeued { events: 8 });

    let queued = queued_types(&queue);
    assert_eq!(queued.len(), 12);
    assert_eq!(queued.first().map(String::as_str), Some("e2"));
    assert_eq!(queued[6], "d0");
    assert_eq!(queued.last().map(String::as_str), Some("d5"));
    assert_eq!(queue.stats().events_dropped, 2);
}

// ============================================================================
// Beacon delivery
// ============================================================================

#[tokio::test]
async fn test_beacon_empties_queue_and_sends_once() {
    let transport = MockBatchTransport::new();
    let beacon = MockBeaconTransport::new();
    let config = QueueConfig {
        beacon_url: Some("https://api.exemple.ca/functions/v1/analytics-batch".into()),
        ..quiet_config()
    };
    let queue = EventQueue::builder(config)
        .transport(transport.clone())
        .beacon(beacon.clone())
        .build()
        .unwrap();

    queue.track("vsl_play");
    queue.track("vsl_progress");
    queue.track("vsl_exit");
    queue.flush_with_beacon();

    assert!(queue.is_empty());
    assert_eq!(beacon.call_count(), 1);
    assert_eq!(
        beacon.urls(),
        vec!["https://api.exemple.ca/functions/v1/analytics-batch".to_string()]
    );
    let types: Vec<_> = beacon.batches()[0]
        .events
        .iter()
        .map(|r| r.event_type.clone())
        .collect();
    assert_eq!(types, vec!["vsl_play", "vsl_progress", "vsl_exit"]);

    settle().await;
    assert_eq!(transport.send_count(), 0);
    assert_eq!(queue.stats().beacons_sent, 1);
}

#[tokio::test]
async fn test_beacon_on_empty_queue_does_nothing() {
    let transport = MockBatchTransport::new();
    let beacon = MockBeaconTransport::new();
    let queue = builder(&transport).beacon(beacon.clone()).build().unwrap();

    queue.flush_with_beacon();
    assert_eq!(beacon.call_count(), 0);
}

#[tokio::test]
async fn test_rejected_beacon_falls_back_to_batch_transport() {
    let transport = MockBatchTransport::new();
    let beacon = MockBeaconTransport::rejecting();
    let queue = builder(&transport).beacon(beacon.clone()).build().unwrap();

    queue.track("booking_view");
    queue.flush_with_beacon();

    assert!(queue.is_empty());
    assert_eq!(beacon.call_count(), 1);

    transport.wait_for_completions(1).await;
    assert_eq!(transport.delivered_event_types(), vec!["booking_view"]);
    assert_eq!(queue.stats().beacon_fallbacks, 1);
}

#[tokio::test]
async fn test_missing_beacon_falls_back_to_batch_transport() {
    let transport = MockBatchTransport::new();
    let queue = builder(&transport).build().unwrap();

    queue.track("lp_exit");
    queue.flush_with_beacon();

    assert!(queue.is_empty());
    transport.wait_for_completions(1).await;
    assert_eq!(transport.delivered_event_types(), vec!["lp_exit"]);
}

#[tokio::test]
async fn test_oversized_beacon_payload_falls_back() {
    let transport = MockBatchTransport::new();
    let beacon = MockBeaconTransport::new();
    let queue = EventQueue::builder(QueueConfig {
        max_beacon_bytes: 64,
        ..quiet_config()
    })
    .transport(transport.clone())
    .beacon(beacon.clone())
    .build()
    .unwrap();

    queue.add(
        "quiz_answer",
        event_data! { "answer" => "une réponse bien trop longue pour tenir dans une balise" },
        None,
    );
    queue.flush_with_beacon();

    assert!(queue.is_empty());
    assert_eq!(beacon.call_count(), 0);
    transport.wait_for_completions(1).await;
    assert_eq!(transport.delivered_event_types(), vec!["quiz_answer"]);
    assert_eq!(queue.stats().beacon_fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_hidden_page_flushes_through_beacon() {
    let transport = MockBatchTransport::new();
    let beacon = MockBeaconTransport::new();
    let lifecycle = LifecycleBroadcaster::new();
    let queue = builder(&transport)
        .beacon(beacon.clone())
        .lifecycle(lifecycle.clone())
        .build()
        .unwrap();

    queue.track("quiz_answer");
    lifecycle.notify(PageLifecycle::Visible);
    settle().await;
    assert_eq!(beacon.call_count(), 0);
    assert_eq!(queue.len(), 1);

    lifecycle.notify(PageLifecycle::Hidden);
    settle().await;
    assert_eq!(beacon.call_count(), 1);
    assert!(queue.is_empty());

    queue.track("lp_exit");
    lifecycle.notify(PageLifecycle::Unload);
    settle().await;
    assert_eq!(beacon.call_count(), 2);
}

#[tokio::test]
async fn test_lagged_lifecycle_listener_flushes_through_beacon() {
    let transport = MockBatchTransport::new();
    let beacon = MockBeaconTransport::new();
    let lifecycle = LifecycleBroadcaster::new();
    let queue = builder(&transport)
        .beacon(beacon.clone())
        .lifecycle(lifecycle.clone())
        .build()
        .unwrap();

    queue.track("vsl_play");
    // overrun the channel before the flush task gets to run
    for _ in 0..20 {
        lifecycle.notify(PageLifecycle::Visible);
    }
    settle().await;

    assert_eq!(beacon.call_count(), 1);
    assert!(queue.is_empty());
    assert_eq!(transport.send_count(), 0);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_once_and_stops_timer() {
    let transport = MockBatchTransport::new();
    let queue = EventQueue::builder(QueueConfig::default())
        .transport(transport.clone())
        .build()
        .unwrap();

    queue.track("booking_submitted");
    assert_eq!(queue.shutdown().await, FlushOutcome::Delivered { events: 1 });
    assert_eq!(transport.send_count(), 1);

    for _ in 0..10 {
        queue.track("after_shutdown");
    }
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(transport.send_count(), 1);
    assert_eq!(queue.len(), 10);
}

#[tokio::test]
async fn test_shutdown_while_offline_keeps_events() {
    let transport = MockBatchTransport::new();
    let queue = builder(&transport)
        .network(NetworkMonitor::new(false))
        .build()
        .unwrap();

    queue.track("lp_view");
    assert_eq!(
        queue.shutdown().await,
        FlushOutcome::Skipped(SkipReason::Offline)
    );
    assert_eq!(queue.len(), 1);
}

// ============================================================================
// Wire records
// ============================================================================

#[tokio::test]
async fn test_records_carry_page_context_and_session() {
    let transport = MockBatchTransport::new();
    let config = QueueConfig {
        session_id: Some("sess-queue".into()),
        ..quiet_config()
    };
    let queue = EventQueue::builder(config)
        .transport(transport.clone())
        .page_context(PageContext::new("https://exemple.ca/", ""))
        .build()
        .unwrap();

    queue.set_page_context(PageContext::new(
        "https://exemple.ca/quiz",
        "https://facebook.com/",
    ));
    queue.add(
        "quiz_answer",
        event_data! { "session_id" => "sess-page", "answer" => "b" },
        Some("lead-9".into()),
    );
    queue.track("quiz_start");
    queue.flush().await;

    let batch = &transport.delivered()[0];
    let answer = &batch.events[0];
    assert_eq!(answer.session_id, "sess-page");
    assert_eq!(answer.lead_id.as_deref(), Some("lead-9"));
    assert_eq!(answer.event_data["answer"], json!("b"));
    assert_eq!(answer.event_data["page_url"], json!("https://exemple.ca/quiz"));
    assert_eq!(answer.event_data["referrer"], json!("https://facebook.com/"));

    let start = &batch.events[1];
    assert_eq!(start.session_id, "sess-queue");
    assert_eq!(start.lead_id, None);
}

#[tokio::test]
async fn test_session_stamping_can_be_disabled() {
    let transport = MockBatchTransport::new();
    let config = QueueConfig {
        stamp_session_id: false,
        ..quiet_config()
    };
    let queue = EventQueue::builder(config)
        .transport(transport.clone())
        .build()
        .unwrap();

    queue.track("lp_view");
    queue.flush().await;
    assert_eq!(transport.delivered()[0].events[0].session_id, "");
}

#[tokio::test]
async fn test_created_at_is_recording_time() {
    let transport = MockBatchTransport::new();
    let recorded_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
    let clock = ManualClock::new(recorded_at);
    let queue = builder(&transport).clock(clock.clone()).build().unwrap();

    queue.track("vsl_play");
    clock.advance(chrono::Duration::hours(1));
    queue.flush().await;

    assert_eq!(transport.delivered()[0].events[0].created_at, recorded_at);
}
