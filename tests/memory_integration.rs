//! Memory provider integration tests
//!
//! End-to-end scenarios over the in-memory broker, the memory index store
//! and in-process alert sinks: heartbeat absence timing, graceful exit
//! ordering, alert rendering, drop-and-reconnect shipping and replay.

use cache_sentinel::alert::{Alert, AlertKind};
use cache_sentinel::sink::AlertSink;
use cache_sentinel::{
    AlertEngine, AlertEngineConfig, Annotations, DlqHandler, Emitter, EmitterConfig, Event,
    EventBus, LogShipper, MemoryAlertSink, MemoryDlqHandler, MemoryIndexStore, MemoryProvider,
    NodeStatus, SentinelError, ShipperConfig,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

fn memory_bus() -> (MemoryProvider, Arc<EventBus>) {
    let provider = MemoryProvider::default();
    let bus = Arc::new(EventBus::new(provider.clone()));
    (provider, bus)
}

/// Records when (on the tokio clock) each alert arrived
#[derive(Default)]
struct TimedSink {
    alerts: Mutex<Vec<(Instant, Alert)>>,
}

impl TimedSink {
    fn of_kind(&self, kind: AlertKind) -> Vec<(Instant, Alert)> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, a)| a.kind == kind)
            .cloned()
            .collect()
    }

    fn kinds_for(&self, node_id: &str) -> Vec<AlertKind> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, a)| a.node_id == node_id)
            .map(|(_, a)| a.kind)
            .collect()
    }
}

impl AlertSink for TimedSink {
    fn deliver(&self, alert: &Alert) {
        self.alerts
            .lock()
            .unwrap()
            .push((Instant::now(), alert.clone()));
    }
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(60);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ─── Heartbeat liveness ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_writer_missing_heartbeat_timeline() {
    let (_provider, bus) = memory_bus();
    let sink = Arc::new(TimedSink::default());
    let t0 = Instant::now();
    let handle = AlertEngine::new(bus.clone(), sink.clone(), AlertEngineConfig::default())
        .start()
        .await
        .unwrap();

    bus.publish(&Event::registration("writer-1", "CacheWriterService", NodeStatus::Up))
        .await
        .unwrap();
    for i in 0..3 {
        if i > 0 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        bus.publish(&Event::heartbeat("writer-1", NodeStatus::Up))
            .await
            .unwrap();
    }

    // last heartbeat at t=10, then silence
    tokio::time::sleep_until(t0 + Duration::from_secs(36)).await;
    handle.shutdown().await;

    let missing: Vec<Duration> = sink
        .of_kind(AlertKind::HeartbeatMissing)
        .iter()
        .map(|(at, alert)| {
            assert_eq!(alert.node_id, "writer-1");
            assert_eq!(alert.message, "No heartbeat from Node writer-1 for 10 seconds!");
            *at - t0
        })
        .collect();

    assert!(missing.len() >= 3, "alerts: {:?}", missing);
    // within scan_period + threshold of the last heartbeat
    assert!(missing[0] >= Duration::from_secs(20));
    assert!(missing[0] <= Duration::from_secs(25));
    // level-triggered: one per scan while silent
    for pair in missing.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
    }
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_resumption_stops_alerts() {
    let (_provider, bus) = memory_bus();
    let sink = Arc::new(TimedSink::default());
    let t0 = Instant::now();
    let handle = AlertEngine::new(bus.clone(), sink.clone(), AlertEngineConfig::default())
        .start()
        .await
        .unwrap();

    bus.publish(&Event::heartbeat("reader-1", NodeStatus::Up)).await.unwrap();
    tokio::time::sleep_until(t0 + Duration::from_secs(17)).await;
    assert_eq!(sink.of_kind(AlertKind::HeartbeatMissing).len(), 1);

    // back after a restart; heartbeats every 5s from t=17
    for _ in 0..4 {
        bus.publish(&Event::heartbeat("reader-1", NodeStatus::Up)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    handle.shutdown().await;

    assert_eq!(sink.of_kind(AlertKind::HeartbeatMissing).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_exit_shutdown_precedes_missing() {
    let (_provider, bus) = memory_bus();
    let sink = Arc::new(TimedSink::default());
    let t0 = Instant::now();
    let handle = AlertEngine::new(bus.clone(), sink.clone(), AlertEngineConfig::default())
        .start()
        .await
        .unwrap();

    bus.publish(&Event::heartbeat("writer-1", NodeStatus::Up)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    bus.publish(&Event::heartbeat("writer-1", NodeStatus::Down)).await.unwrap();

    tokio::time::sleep_until(t0 + Duration::from_secs(21)).await;
    handle.shutdown().await;

    let kinds = sink.kinds_for("writer-1");
    assert_eq!(
        kinds.iter().filter(|k| **k == AlertKind::Shutdown).count(),
        1
    );
    assert_eq!(kinds[0], AlertKind::Shutdown);

    // no absence report within one scan window of the graceful exit
    let shutdown_at = sink.of_kind(AlertKind::Shutdown)[0].0;
    for (at, _) in sink.of_kind(AlertKind::HeartbeatMissing) {
        assert!(at - shutdown_at > Duration::from_secs(5));
    }
}

#[tokio::test(start_paused = true)]
async fn test_emitter_departure_sequence_alerts() {
    let (_provider, bus) = memory_bus();
    let sink = Arc::new(MemoryAlertSink::default());
    let handle = AlertEngine::new(bus.clone(), sink.clone(), AlertEngineConfig::default())
        .start()
        .await
        .unwrap();

    let emitter = Arc::new(Emitter::new(
        bus,
        "Writer_Service",
        "CacheWriterService",
        EmitterConfig::default(),
    ));
    assert!(emitter.register().await);
    let heartbeat = emitter.spawn_heartbeat();
    tokio::time::sleep(Duration::from_secs(7)).await;
    emitter.shutdown(Some(heartbeat)).await;
    handle.shutdown().await;

    let alerts = sink.all();
    let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![AlertKind::Warning, AlertKind::Shutdown]);
    assert_eq!(
        alerts[0].message,
        "Warning in CacheWriterService (Node Writer_Service): node going off"
    );
    assert_eq!(alerts[1].message, "Node Writer_Service is shutting down!");
}

// ─── Classification ──────────────────────────────────────────────

#[tokio::test]
async fn test_error_alert_carries_nested_message_verbatim() {
    let (_provider, bus) = memory_bus();
    let sink = Arc::new(MemoryAlertSink::default());
    let handle = AlertEngine::new(bus.clone(), sink.clone(), AlertEngineConfig::default())
        .start()
        .await
        .unwrap();

    let emitter = Emitter::new(bus, "Writer_Service", "CacheWriterService", EmitterConfig::default());
    emitter
        .record_failure("set", "foo", "Cache set operation returned error: \"disk full\" (errno=28)")
        .await;

    wait_for(|| sink.count() >= 1).await;
    handle.shutdown().await;

    let alert = &sink.of_kind(AlertKind::Error)[0];
    assert!(alert.message.contains("CacheWriterService"));
    assert!(alert.message.contains("Writer_Service"));
    assert!(alert
        .message
        .ends_with("Cache set operation returned error: \"disk full\" (errno=28)"));
}

#[tokio::test]
async fn test_slow_operation_warning_rendering() {
    let (_provider, bus) = memory_bus();
    let sink = Arc::new(MemoryAlertSink::default());
    let handle = AlertEngine::new(bus.clone(), sink.clone(), AlertEngineConfig::default())
        .start()
        .await
        .unwrap();

    bus.publish(&Event::log_warn(
        "writer-1",
        "CacheWriterService",
        "Slow SET operation for key: foo",
        150.0,
        100.0,
    ))
    .await
    .unwrap();

    wait_for(|| sink.count() >= 1).await;
    handle.shutdown().await;

    let line = sink.of_kind(AlertKind::Warning)[0].render_plain();
    assert!(line.contains("WARNING: "));
    assert!(line.contains("CacheWriterService"));
    assert!(line.contains("Slow SET operation for key: foo"));
    assert!(!line.contains("150"));
    assert!(!line.contains("100"));
}

#[tokio::test]
async fn test_invalid_messages_do_not_stop_the_engine() {
    let (_provider, bus) = memory_bus();
    let sink = Arc::new(MemoryAlertSink::default());
    let dlq = Arc::new(MemoryDlqHandler::default());
    let handle = AlertEngine::new(bus.clone(), sink.clone(), AlertEngineConfig::default())
        .with_dlq(dlq.clone())
        .start()
        .await
        .unwrap();

    bus.publish_raw("cache.log.error", "{truncated").await.unwrap();
    bus.publish_raw("cache.log.warn", r#"{"message_type":"LOG","log_level":"WARN"}"#)
        .await
        .unwrap();
    bus.publish(&Event::log_error("n1", "CacheReadService", "m", "CONN_ERROR", "refused"))
        .await
        .unwrap();

    wait_for(|| sink.count() >= 1).await;
    handle.shutdown().await;

    assert_eq!(sink.count(), 1);
    assert_eq!(dlq.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_emission_failure_is_not_an_error() {
    let (provider, bus) = memory_bus();
    provider.close();

    let emitter = Emitter::new(bus, "n1", "CacheWriterService", EmitterConfig::default());
    assert!(!emitter.register().await);
    assert!(
        !emitter
            .record_operation("get", "foo", Duration::from_millis(1), Annotations::new())
            .await
    );
    assert_eq!(emitter.failures(), 2);
}

// ─── Log shipper ─────────────────────────────────────────────────

async fn publish_heartbeats(bus: &EventBus, node: &str, n: usize) {
    for _ in 0..n {
        bus.publish(&Event::heartbeat(node, NodeStatus::Up)).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_shipper_survives_store_outage() {
    const N: usize = 3;
    const K: usize = 4;

    let (_provider, bus) = memory_bus();
    let store = MemoryIndexStore::new();
    let dlq = Arc::new(MemoryDlqHandler::default());
    let shipper = LogShipper::new(bus.clone(), Arc::new(store.clone()), ShipperConfig::default())
        .with_dlq(dlq.clone());
    let stats = shipper.stats();
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(shipper.run(stop_rx));

    publish_heartbeats(&bus, "before", N).await;
    wait_for(|| stats.indexed() == N as u64).await;

    // outage: the next message fails and the store stays down for 7s
    store.set_healthy(false);
    let outage_start = Instant::now();
    let restorer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        restorer.set_healthy(true);
    });
    publish_heartbeats(&bus, "lost", 1).await;
    publish_heartbeats(&bus, "after", K).await;

    wait_for(|| stats.indexed() == (N + K) as u64).await;
    stop_tx.send(true).unwrap();
    let snapshot = task.await.unwrap().unwrap();

    assert_eq!(snapshot.received, (N + K + 1) as u64);
    assert_eq!(snapshot.indexed, (N + K) as u64);
    assert_eq!(snapshot.dropped, 1);
    assert_eq!(snapshot.reconnects, 1);

    let docs = store.documents("cache-logs");
    assert_eq!(docs.len(), N + K);
    assert!(docs[..N].iter().all(|d| d["node_id"] == "before"));
    assert!(docs[N..].iter().all(|d| d["node_id"] == "after"));
    assert!(docs.iter().all(|d| d["source_topic"] == "cache.heartbeat"));

    // initial connect plus three reconnect attempts, 5s apart
    let attempts = store.connect_attempts();
    assert_eq!(attempts.len(), 4);
    let reconnects = &attempts[1..];
    assert!(reconnects[0] >= outage_start);
    for pair in reconnects.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(5));
    }

    let dead = dlq.list(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.contains("store unavailable"));
}

#[tokio::test(start_paused = true)]
async fn test_shipper_gives_up_after_bounded_retries() {
    let (_provider, bus) = memory_bus();
    let store = MemoryIndexStore::new();
    let shipper = LogShipper::new(bus.clone(), Arc::new(store.clone()), ShipperConfig::default());
    let stats = shipper.stats();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(shipper.run(stop_rx));

    publish_heartbeats(&bus, "n1", 2).await;
    wait_for(|| stats.indexed() == 2).await;

    store.set_healthy(false);
    let outage_start = Instant::now();
    publish_heartbeats(&bus, "n1", 5).await;

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, SentinelError::StoreUnavailable { attempts: 3, .. }));
    assert!(outage_start.elapsed() >= Duration::from_secs(10));
    // one dropped message; the rest stay on the broker
    assert_eq!(stats.snapshot().dropped, 1);
    assert_eq!(store.connect_attempts().len(), 1 + 3);
}

#[tokio::test]
async fn test_shipper_fails_fast_when_store_down_at_startup() {
    let (_provider, bus) = memory_bus();
    let store = MemoryIndexStore::new();
    store.fail_next_connects(10);
    let config = ShipperConfig {
        retry: cache_sentinel::RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        },
        ..ShipperConfig::default()
    };
    let shipper = LogShipper::new(bus, Arc::new(store.clone()), config);
    let (_stop_tx, stop_rx) = watch::channel(false);

    let err = shipper.run(stop_rx).await.unwrap_err();
    assert!(matches!(err, SentinelError::StoreUnavailable { attempts: 2, .. }));
    assert_eq!(store.connect_attempts().len(), 2);
}

// ─── Replay ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_replay_is_tolerated() {
    let (_provider, bus) = memory_bus();
    let store = MemoryIndexStore::new();
    let shipper = LogShipper::new(bus.clone(), Arc::new(store.clone()), ShipperConfig::default());

    let event = Event::heartbeat("writer-1", NodeStatus::Up);
    let received = cache_sentinel::ReceivedEvent {
        topic: "cache.heartbeat".to_string(),
        sequence: 1,
        num_delivered: 2,
        payload: serde_json::to_vec(&event).unwrap().into(),
    };

    tokio_test::assert_ok!(shipper.ship(&store, &received).await);
    tokio_test::assert_ok!(shipper.ship(&store, &received).await);
    assert_eq!(store.count("cache-logs"), 2);

    let sink = Arc::new(MemoryAlertSink::default());
    let engine = AlertEngine::new(bus, sink, AlertEngineConfig::default());
    engine.handle_delivery(&received).await.unwrap();
    let first = engine.liveness().lock().await.last_seen("writer-1").unwrap();
    engine.handle_delivery(&received).await.unwrap();
    let second = engine.liveness().lock().await.last_seen("writer-1").unwrap();
    assert!(second >= first);
    assert_eq!(engine.liveness().lock().await.len(), 1);
}

#[tokio::test]
async fn test_shipper_restart_resumes_from_committed_position() {
    let (_provider, bus) = memory_bus();
    let store = MemoryIndexStore::new();

    publish_heartbeats(&bus, "first", 3).await;
    let shipper = LogShipper::new(bus.clone(), Arc::new(store.clone()), ShipperConfig::default());
    let stats = shipper.stats();
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(shipper.run(stop_rx));
    wait_for(|| stats.indexed() == 3).await;
    stop_tx.send(true).unwrap();
    task.await.unwrap().unwrap();

    publish_heartbeats(&bus, "second", 2).await;
    let shipper = LogShipper::new(bus.clone(), Arc::new(store.clone()), ShipperConfig::default());
    let stats = shipper.stats();
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(shipper.run(stop_rx));
    wait_for(|| stats.indexed() == 2).await;
    stop_tx.send(true).unwrap();
    task.await.unwrap().unwrap();

    let docs = store.documents("cache-logs");
    assert_eq!(docs.len(), 5);
    assert!(docs[3..].iter().all(|d| d["node_id"] == "second"));
}

#[tokio::test]
async fn test_independent_consumer_groups_see_every_event() {
    let (_provider, bus) = memory_bus();
    let sink = Arc::new(MemoryAlertSink::default());
    let handle = AlertEngine::new(bus.clone(), sink.clone(), AlertEngineConfig::default())
        .start()
        .await
        .unwrap();

    let store = MemoryIndexStore::new();
    let shipper = LogShipper::new(bus.clone(), Arc::new(store.clone()), ShipperConfig::default());
    let stats = shipper.stats();
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(shipper.run(stop_rx));

    let emitter = Emitter::new(bus, "Read_Service", "CacheReadService", EmitterConfig::default());
    emitter.register().await;
    emitter.info("Got value for key: foo", Annotations::new()).await;
    emitter.error("Failed to get value", "GET_ERROR", "key not found").await;

    wait_for(|| stats.indexed() == 3 && sink.count() == 1).await;
    stop_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
    handle.shutdown().await;

    assert_eq!(sink.of_kind(AlertKind::Error).len(), 1);
    let topics: Vec<String> = store
        .documents("cache-logs")
        .iter()
        .map(|d| d["source_topic"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        topics,
        vec!["cache.registration", "cache.log.info", "cache.log.error"]
    );
}
