//! End-to-end buffering scenarios
//!
//! Each test drives a real `BufferCore` against the in-memory store and the
//! recording sink, with tokio time paused so timer flushes are deterministic.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spillway_buffer::{BufferConfig, BufferCore, Collaborators, FlushOutcome, RetryPolicy};
use spillway_core::{Event, PartitionId, Sink, SystemClock};
use spillway_sink::RecordingSink;
use spillway_storage::{DurableStore, InMemoryDurableStore, RedbDurableStore, RedbStoreConfig};
use tempfile::TempDir;

fn ev(name: &str) -> Event {
    Event::new(json!({"ev": name, "uid": "user-1"}))
}

fn build(
    config: BufferConfig,
    store: Arc<dyn DurableStore>,
    sink: &Arc<RecordingSink>,
) -> Arc<BufferCore> {
    BufferCore::new(
        PartitionId::global(),
        config,
        Collaborators {
            store,
            sink: Some(Arc::clone(sink) as Arc<dyn Sink>),
            clock: Arc::new(SystemClock::new()),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_order_preserved_without_flush() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let core = build(BufferConfig::default(), store, &sink);

    let events: Vec<Event> = (0..20).map(|i| ev(&format!("e{i}"))).collect();
    for event in &events {
        core.ingest(event.clone()).await.unwrap();
    }

    assert_eq!(core.pending_events().await, events);
    assert_eq!(sink.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_count_trigger_delivers_abc() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let core = build(BufferConfig::default().with_max_event_count(3), store, &sink);

    for name in ["A", "B", "C"] {
        core.ingest(ev(name)).await.unwrap();
    }
    core.settled().await;

    assert_eq!(sink.batches().len(), 1);
    assert_eq!(sink.events(), vec![ev("A"), ev("B"), ev("C")]);
    let stats = core.stats().await;
    assert_eq!(stats.buffered_events, 0);
    assert_eq!(stats.buffered_bytes, 0);
    assert!(stats.last_flush_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_then_timer_retry() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let config = BufferConfig::passive().with_max_event_count(3);
    let core = build(config, store, &sink);

    sink.fail_next(1);
    for name in ["A", "B", "C"] {
        core.ingest(ev(name)).await.unwrap();
    }
    core.settled().await;

    assert!(sink.batches().is_empty());
    assert_eq!(core.pending_events().await, vec![ev("A"), ev("B"), ev("C")]);
    assert_eq!(core.stats().await.consecutive_failures, 1);

    // Nothing else crosses a threshold, so the interval timer retries
    sink.wait_for_attempts(2).await;
    core.settled().await;

    assert_eq!(sink.events(), vec![ev("A"), ev("B"), ev("C")]);
    assert!(core.pending_events().await.is_empty());
    assert_eq!(core.stats().await.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_loss_under_repeated_failures() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let core = build(BufferConfig::passive(), store, &sink);

    let mut ingested = Vec::new();
    sink.set_fail_always(true);
    for round in 0..4 {
        for i in 0..3 {
            let event = ev(&format!("r{round}-{i}"));
            core.ingest(event.clone()).await.unwrap();
            ingested.push(event);
        }
        assert!(core.flush().await.is_err());
    }

    sink.set_fail_always(false);
    assert_eq!(
        core.flush().await.unwrap(),
        FlushOutcome::Delivered { events: 12 }
    );

    assert_eq!(sink.events(), ingested);
    assert_eq!(sink.batches().len(), 1);
    assert!(core.pending_events().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_events_during_send_stay_behind_snapshot() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let core = build(BufferConfig::passive().with_max_event_count(2), store, &sink);

    sink.hold();
    sink.fail_next(1);
    core.ingest(ev("A")).await.unwrap();
    core.ingest(ev("B")).await.unwrap();
    sink.wait_for_attempts(1).await;

    // Arrives while [A, B] is in flight
    core.ingest(ev("C")).await.unwrap();
    assert_eq!(core.stats().await.in_flight_events, 2);
    assert_eq!(core.stats().await.buffered_events, 1);

    sink.release();
    core.settled().await;
    assert_eq!(core.pending_events().await, vec![ev("A"), ev("B"), ev("C")]);

    core.flush().await.unwrap();
    assert_eq!(sink.events(), vec![ev("A"), ev("B"), ev("C")]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_flush_is_noop() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let core = build(BufferConfig::default(), store.clone(), &sink);

    let before = core.stats().await;
    assert_eq!(core.flush().await.unwrap(), FlushOutcome::Empty);
    assert_eq!(core.flush().await.unwrap(), FlushOutcome::Empty);

    assert_eq!(sink.attempts(), 0);
    assert_eq!(core.stats().await, before);
    assert_eq!(store.put_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_size_trigger_flushes_first_alone() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());

    let padding = "x".repeat(600);
    let first = Event::new(json!({"ev": "first", "uid": "u", "pad": padding}));
    let second = Event::new(json!({"ev": "second", "uid": "u", "pad": padding}));
    let limit = first.encoded_len().unwrap() + second.encoded_len().unwrap() - 1;

    let core = build(BufferConfig::default().with_max_buffer_bytes(limit), store, &sink);
    core.ingest(first.clone()).await.unwrap();
    core.ingest(second.clone()).await.unwrap();
    core.settled().await;

    assert_eq!(sink.batches().len(), 1);
    assert_eq!(sink.events(), vec![first]);
    assert_eq!(core.pending_events().await, vec![second.clone()]);
    assert_eq!(
        core.stats().await.buffered_bytes,
        second.encoded_len().unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn test_oversized_event_into_empty_buffer_is_kept() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let core = build(BufferConfig::default().with_max_buffer_bytes(10), store, &sink);

    let big = ev("much larger than ten bytes");
    core.ingest(big.clone()).await.unwrap();
    core.settled().await;

    assert_eq!(sink.attempts(), 0);
    assert_eq!(core.pending_events().await, vec![big]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_restores_events_in_order() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let events: Vec<Event> = (0..5).map(|i| ev(&format!("e{i}"))).collect();

    {
        let core = build(BufferConfig::default(), store.clone(), &sink);
        for event in &events {
            core.ingest(event.clone()).await.unwrap();
        }
    }

    let core = build(BufferConfig::default(), store, &sink);
    core.ingest(ev("after restart")).await.unwrap();

    let mut expected = events.clone();
    expected.push(ev("after restart"));
    assert_eq!(core.pending_events().await, expected);
}

#[tokio::test(start_paused = true)]
async fn test_crash_during_send_keeps_snapshot_durable() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());

    {
        let core = build(BufferConfig::default().with_max_event_count(2), store.clone(), &sink);
        sink.hold();
        core.ingest(ev("A")).await.unwrap();
        core.ingest(ev("B")).await.unwrap();
        sink.wait_for_attempts(1).await;
        // Process dies with [A, B] in flight
    }

    let fresh_sink = Arc::new(RecordingSink::new());
    let core = build(BufferConfig::default(), store, &fresh_sink);
    core.rehydrate().await.unwrap();
    assert_eq!(core.pending_events().await, vec![ev("A"), ev("B")]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_adopts_alarm_and_flushes() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());

    {
        let core = build(BufferConfig::default(), store.clone(), &sink);
        core.ingest(ev("A")).await.unwrap();
        assert!(store.get_alarm(&PartitionId::global()).await.unwrap().is_some());
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(sink.attempts(), 0);

    // The persisted deadline is already past, so it fires right away
    let core = build(BufferConfig::default(), store, &sink);
    core.rehydrate().await.unwrap();
    sink.wait_for_attempts(1).await;
    core.settled().await;
    assert_eq!(sink.events(), vec![ev("A")]);
}

#[tokio::test(start_paused = true)]
async fn test_timer_flush_rearms() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let config = BufferConfig::default().with_flush_interval(Duration::from_secs(10));
    let core = build(config, store, &sink);

    core.ingest(ev("A")).await.unwrap();
    let first = core.stats().await.next_deadline_ms.unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    core.settled().await;
    assert_eq!(sink.events(), vec![ev("A")]);

    let next = core.stats().await.next_deadline_ms.unwrap();
    assert!(next > first);
}

#[tokio::test(start_paused = true)]
async fn test_restart_with_redb_store() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());

    {
        let store = Arc::new(RedbDurableStore::open(RedbStoreConfig::in_dir(dir.path())).unwrap());
        let core = build(BufferConfig::default(), store, &sink);
        core.ingest(ev("A")).await.unwrap();
        core.ingest(ev("B")).await.unwrap();
    }
    // Let the stopped timer task release its handle on the database
    tokio::time::sleep(Duration::from_millis(10)).await;

    let store = Arc::new(RedbDurableStore::open(RedbStoreConfig::in_dir(dir.path())).unwrap());
    let core = build(BufferConfig::default(), store, &sink);
    assert_eq!(core.flush().await.unwrap(), FlushOutcome::Delivered { events: 2 });
    assert_eq!(sink.events(), vec![ev("A"), ev("B")]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_retries_before_interval() {
    let store = Arc::new(InMemoryDurableStore::new());
    let sink = Arc::new(RecordingSink::new());
    let config = BufferConfig::default()
        .with_flush_interval(Duration::from_secs(60))
        .with_retry(RetryPolicy::Backoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        });
    let core = build(config, store, &sink);

    core.ingest(ev("A")).await.unwrap();
    sink.fail_next(3);
    let start = tokio::time::Instant::now();
    assert!(core.flush().await.is_err());

    // Retries after 1s, 2s, then 4s; the fourth attempt succeeds
    sink.wait_for_attempts(4).await;
    core.settled().await;

    assert_eq!(sink.events(), vec![ev("A")]);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(60), "{elapsed:?}");
}
