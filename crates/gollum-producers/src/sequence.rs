//! Minimal concrete `Consumer`: emits a fixed run of synthetic messages
//! onto its configured stream and stops. Real sources (Kafka, CSV,
//! sockets, profilers) are out of scope per spec.md's Non-goals, but
//! scenario tests still need something upstream of a producer to drive
//! messages through a topology end to end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use gollum_core::{
    Configurable, Consumer, Message, MetricsRegistry, PluginConfig, PluginState, PluginStateCell,
    RegisteredPlugin, SequenceGenerator,
};
use gollum_runtime::StreamRegistry;

/// Emits `Count` messages with payload `"m" + i` (`i` from `0` up to but
/// excluding `Count`) onto `Stream`, waiting `IntervalMs` between sends,
/// then stops. `PayloadBytes`, if larger than the marker itself, pads
/// each payload with trailing zero bytes, letting a scenario force real
/// segment rotation without needing thousands of messages. Grounded on
/// `rde-io::source_csv.rs`'s source loop: check cancellation, send the
/// next item, `break` when the source is exhausted — the same shape
/// with a synthetic generator standing in for the file reader.
pub struct SequenceConsumer {
    stream_registry: Arc<StreamRegistry>,
    metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
    state: Arc<PluginStateCell>,
    id: Arc<str>,
    stream_name: String,
    count: u64,
    interval: Duration,
    payload_bytes: usize,
}

impl SequenceConsumer {
    pub fn new(
        stream_registry: Arc<StreamRegistry>,
        metrics: Arc<MetricsRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream_registry,
            metrics,
            cancel,
            state: Arc::new(PluginStateCell::default()),
            id: Arc::from(""),
            stream_name: String::new(),
            count: 0,
            interval: Duration::ZERO,
            payload_bytes: 0,
        }
    }
}

#[async_trait]
impl Configurable for SequenceConsumer {
    async fn configure(&mut self, config: &PluginConfig) -> anyhow::Result<()> {
        self.id = Arc::from(config.id().as_str());
        self.stream_name = config.get_str("Stream", "");
        self.count = config.get_u64("Count", 0);
        self.interval = config.get_duration_ms("IntervalMs", 0);
        self.payload_bytes = config.get_u64("PayloadBytes", 0) as usize;
        Ok(())
    }
}

#[async_trait]
impl Consumer for SequenceConsumer {
    async fn consume(&mut self) -> anyhow::Result<()> {
        self.state.set(PluginState::Active);
        let stream_id = self.stream_registry.register(&self.stream_name);
        let seq = SequenceGenerator::new();

        for i in 0..self.count {
            if self.cancel.is_cancelled() {
                break;
            }
            let mut data = format!("m{i}").into_bytes();
            if data.len() < self.payload_bytes {
                data.resize(self.payload_bytes, 0);
            }
            let msg = Message::new(data, stream_id, &seq);
            for (tx, routed) in self.stream_registry.route(msg) {
                if tx.send(routed).await.is_err() {
                    self.metrics.add(&format!("{}:Messages-dropped", self.id), 1);
                }
            }
            self.metrics.add(&format!("{}:Messages-ok", self.id), 1);
            if !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
        }

        self.state.set(PluginState::Dead);
        Ok(())
    }
}

impl RegisteredPlugin for SequenceConsumer {
    fn state(&self) -> PluginState {
        self.state.get()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gollum_core::MetricsRegistry;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn config(stream: &str, count: u64) -> PluginConfig {
        let mut values = HashMap::new();
        values.insert("ID".to_string(), serde_yaml::Value::String("seq1".to_string()));
        values.insert("Stream".to_string(), serde_yaml::Value::String(stream.to_string()));
        values.insert("Count".to_string(), serde_yaml::Value::Number(count.into()));
        PluginConfig::new(values)
    }

    #[tokio::test]
    async fn emits_count_messages_in_order() {
        let registry = Arc::new(StreamRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let mut consumer = SequenceConsumer::new(registry.clone(), metrics, CancellationToken::new());
        consumer.configure(&config("A", 5)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let stream_id = registry.register("A");
        registry.subscribe(stream_id, tx);

        consumer.consume().await.unwrap();

        let mut received = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            received.push(String::from_utf8(msg.data().to_vec()).unwrap());
        }
        assert_eq!(received, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(consumer.state(), PluginState::Dead);
    }

    #[tokio::test]
    async fn stops_early_once_cancelled() {
        let registry = Arc::new(StreamRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let cancel = CancellationToken::new();
        let mut consumer = SequenceConsumer::new(registry.clone(), metrics, cancel.clone());
        consumer.configure(&config("A", 1_000_000)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(1_000_000);
        let stream_id = registry.register("A");
        registry.subscribe(stream_id, tx);

        cancel.cancel();
        consumer.consume().await.unwrap();

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received < 1_000_000);
    }

    #[tokio::test]
    async fn payload_bytes_pads_without_disturbing_the_marker() {
        let registry = Arc::new(StreamRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let mut consumer = SequenceConsumer::new(registry.clone(), metrics, CancellationToken::new());
        let mut values = HashMap::new();
        values.insert("ID".to_string(), serde_yaml::Value::String("seq1".to_string()));
        values.insert("Stream".to_string(), serde_yaml::Value::String("A".to_string()));
        values.insert("Count".to_string(), serde_yaml::Value::Number(2.into()));
        values.insert("PayloadBytes".to_string(), serde_yaml::Value::Number(64.into()));
        consumer.configure(&PluginConfig::new(values)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let stream_id = registry.register("A");
        registry.subscribe(stream_id, tx);

        consumer.consume().await.unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.data().len(), 64);
        assert!(first.data().starts_with(b"m0"));
    }
}
