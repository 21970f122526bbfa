//! End-to-end scenario tests wiring real producers together through a
//! live `Supervisor`, rather than exercising a single module in
//! isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use gollum_core::{
    hash_stream_name, Configurable, ControlMessage, Consumer, Message, MetricsRegistry, PluginConfig,
    PluginRegistry, Producer, SequenceGenerator, TypeRegistry,
};
use gollum_producers::{NullProducer, SequenceConsumer};
use gollum_runtime::{ProducerBase, ProducerHandle, StreamRegistry, Supervisor};
use gollum_spool::SpoolingProducer;

fn config(id: &str, stream: &str, drop_stream: &str) -> PluginConfig {
    let mut values = HashMap::new();
    values.insert("ID".to_string(), serde_yaml::Value::String(id.to_string()));
    values.insert("Stream".to_string(), serde_yaml::Value::String(stream.to_string()));
    if !drop_stream.is_empty() {
        values.insert("DropStream".to_string(), serde_yaml::Value::String(drop_stream.to_string()));
    }
    PluginConfig::new(values)
}

/// Two producers, P1 dropping to the stream P2 consumes. On shutdown,
/// P1's stop must complete before P2's shutdown begins — matching
/// spec.md §8 scenario 4.
#[tokio::test]
async fn ordered_shutdown_stops_drop_source_before_drop_target() {
    let stream_registry = Arc::new(StreamRegistry::new());
    let metrics = Arc::new(MetricsRegistry::new());

    let mut p1 = NullProducer::new(stream_registry.clone(), metrics.clone());
    p1.configure(&config("p1", "p1-in", "p2-in")).await.unwrap();
    let mut p2 = NullProducer::new(stream_registry.clone(), metrics.clone());
    p2.configure(&config("p2", "p2-in", "")).await.unwrap();

    let completion_order: Arc<AsyncMutex<Vec<&'static str>>> = Arc::new(AsyncMutex::new(Vec::new()));

    let h1 = p1.handle().unwrap();
    let order1 = completion_order.clone();
    let join1 = tokio::spawn(async move {
        p1.produce().await.unwrap();
        order1.lock().await.push("p1");
    });

    let h2 = p2.handle().unwrap();
    let order2 = completion_order.clone();
    let join2 = tokio::spawn(async move {
        p2.produce().await.unwrap();
        order2.lock().await.push("p2");
    });

    let type_registry = Arc::new(TypeRegistry::new());
    let plugin_registry = Arc::new(PluginRegistry::new());
    let supervisor = Supervisor::new(type_registry, plugin_registry, stream_registry.clone(), metrics);
    supervisor.register_producer("p1", h1, "p1-in", "p2-in", join1);
    supervisor.register_producer("p2", h2, "p2-in", "", join2);

    supervisor.shutdown(Duration::from_secs(1)).await;

    let order = completion_order.lock().await;
    assert_eq!(*order, vec!["p1", "p2"]);
}

/// `Channel=4, ChannelTimeoutMs=10`. Feeding 10 messages 1ms apart with
/// the consumer blocked must drop exactly 6 to the caller's drop
/// callback and leave exactly 4 queued — spec.md §8 scenario 3.
#[tokio::test]
async fn backpressure_drops_exact_count_under_a_blocked_consumer() {
    let metrics = Arc::new(MetricsRegistry::new());
    let (mut base, handle): (ProducerBase, ProducerHandle) =
        ProducerBase::new("P", 4, Duration::from_millis(10), Duration::from_secs(1), metrics);

    let seq = SequenceGenerator::new();
    let dropped = Arc::new(AtomicUsize::new(0));
    for i in 0..10 {
        let msg = Message::new(format!("m{i}").into_bytes(), hash_stream_name("s"), &seq);
        let d = dropped.clone();
        handle
            .enqueue(msg, move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(dropped.load(Ordering::SeqCst), 6);
    assert_eq!(base.drain_pending().len(), 4);
}

/// `consumer.Sequence` feeds stream `A` while `A`'s real downstream is
/// unreachable; every message is redirected to `producer.Spooling`
/// instead, split across several rotated segments by a small
/// `MaxFileSizeMB`. Once the downstream is restored, the independent
/// replay loop drains every sealed segment back onto `A` in order and
/// the spool directory ends up empty — spec.md §8 scenario 1.
#[tokio::test]
async fn spool_and_replay_delivers_every_message_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(StreamRegistry::new());
    let metrics = Arc::new(MetricsRegistry::new());

    let a_id = registry.register("A");
    registry.register("spool-in");

    let mut spool_values = HashMap::new();
    spool_values.insert("ID".to_string(), serde_yaml::Value::String("spool1".to_string()));
    spool_values.insert(
        "Path".to_string(),
        serde_yaml::Value::String(dir.path().to_string_lossy().to_string()),
    );
    spool_values.insert("Stream".to_string(), serde_yaml::Value::String("spool-in".to_string()));
    spool_values.insert("BatchMaxCount".to_string(), serde_yaml::Value::Number(10.into()));
    spool_values.insert("MaxFileSizeMB".to_string(), serde_yaml::Value::Number(1.into()));
    let mut spooling = SpoolingProducer::new(registry.clone(), metrics.clone());
    spooling.configure(&PluginConfig::new(spool_values)).await.unwrap();
    let spool_handle = spooling.handle().unwrap();
    let spool_shared = spooling.shared_state().unwrap();
    let spool_join = tokio::spawn(async move { spooling.produce().await.unwrap() });

    let replay_cancel = CancellationToken::new();
    let replay_join = tokio::spawn(gollum_spool::run_replay_loop(
        spool_shared,
        Duration::from_millis(50),
        replay_cancel.clone(),
    ));

    // Stands in for A's real downstream: unreachable for the first 250
    // arrivals (redirects each to the spooling producer's input stream,
    // the way a real producer's own DropStream wiring would), then
    // switches to genuine delivery — including for whatever replay
    // later re-injects onto A once restored.
    let (a_tx, mut a_rx) = mpsc::channel(512);
    registry.subscribe(a_id, a_tx);
    let (downstream_tx, mut downstream_rx) = mpsc::channel(512);
    let (restored_tx, restored_rx) = tokio::sync::oneshot::channel();
    let relay_registry = registry.clone();
    let relay = tokio::spawn(async move {
        let mut unreachable = true;
        let mut seen = 0;
        let mut restored_tx = Some(restored_tx);
        while let Some(msg) = a_rx.recv().await {
            if unreachable {
                seen += 1;
                let rerouted = msg.routed(hash_stream_name("spool-in"));
                for (tx, m) in relay_registry.route(rerouted) {
                    let _ = tx.send(m).await;
                }
                if seen == 250 {
                    unreachable = false;
                    if let Some(tx) = restored_tx.take() {
                        let _ = tx.send(());
                    }
                }
            } else {
                let _ = downstream_tx.send(msg).await;
            }
        }
    });

    let mut consumer = SequenceConsumer::new(registry.clone(), metrics.clone(), CancellationToken::new());
    let mut consumer_values = HashMap::new();
    consumer_values.insert("ID".to_string(), serde_yaml::Value::String("c1".to_string()));
    consumer_values.insert("Stream".to_string(), serde_yaml::Value::String("A".to_string()));
    consumer_values.insert("Count".to_string(), serde_yaml::Value::Number(250.into()));
    consumer_values.insert("PayloadBytes".to_string(), serde_yaml::Value::Number(15_000.into()));
    consumer.configure(&PluginConfig::new(consumer_values)).await.unwrap();
    consumer.consume().await.unwrap();

    // Wait for every message to have reached the spooling producer's
    // input channel before stopping it, so its shutdown tail flushes
    // and seals the trailing segment rather than leaving it open.
    restored_rx.await.unwrap();
    spool_handle.control_sender().send(ControlMessage::StopProducer).await.unwrap();
    spool_join.await.unwrap();

    let collect = async {
        let mut received = Vec::new();
        while received.len() < 250 {
            match downstream_rx.recv().await {
                Some(msg) => received.push(msg),
                None => break,
            }
        }
        received
    };
    let received = tokio::time::timeout(Duration::from_secs(10), collect).await.unwrap_or_default();

    assert_eq!(received.len(), 250);
    for (i, msg) in received.iter().enumerate() {
        assert!(msg.data().starts_with(format!("m{i}").as_bytes()), "message {i} out of order or missing");
    }

    replay_cancel.cancel();
    let _ = replay_join.await;
    relay.abort();

    let spool_dir = dir.path().join("A");
    let remaining = std::fs::read_dir(&spool_dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(remaining, 0, "spool directory should be empty after replay");
}
