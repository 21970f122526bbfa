//! The spooling producer: accepts messages routed to it (typically as a
//! `DropStream` target), persists them keyed by `PrevStreamID`, and lets
//! the independent replay loop re-inject them later.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use gollum_core::{
    BinaryFormatter, Configurable, ControlMessage, Formatter, Message, MetricsRegistry,
    PluginConfig, PluginState, Producer, RegisteredPlugin, StreamId,
};
use gollum_runtime::{LoopControl, ProducerBase, ProducerHandle, StreamRegistry};

use crate::spool_file::SpoolFile;

/// State shared between the producer's own message/tick loop and the
/// independent replay loop in [`crate::replay`], both of which need the
/// same spool file table and routing fabric handle.
pub struct Shared {
    pub(crate) id: Arc<str>,
    pub(crate) stream_registry: Arc<StreamRegistry>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) base_path: PathBuf,
    pub(crate) max_file_size_mb: u64,
    pub(crate) max_file_age_min: u64,
    pub(crate) batch_max_count: usize,
    pub(crate) batch_timeout: Duration,
    pub(crate) drop_stream: StreamId,
    pub(crate) spool_files: Mutex<HashMap<StreamId, Arc<SpoolFile>>>,
    pub(crate) formatter: Box<dyn Formatter>,
}

pub(crate) fn resolve_or_create_spool_file(shared: &Shared, prev_id: StreamId) -> Arc<SpoolFile> {
    let mut files = shared.spool_files.lock();
    if let Some(f) = files.get(&prev_id) {
        return f.clone();
    }
    let name = shared
        .stream_registry
        .resolve_name(prev_id)
        .unwrap_or_else(|| format!("stream-{:016x}", prev_id.0));
    let file = Arc::new(SpoolFile::new(
        &shared.base_path,
        &name,
        shared.max_file_size_mb,
        shared.max_file_age_min,
        shared.batch_max_count,
    ));
    files.insert(prev_id, file.clone());
    file
}

fn deliver_best_effort(registry: &StreamRegistry, msg: Message) {
    for (tx, m) in registry.route(msg) {
        let _ = tx.try_send(m);
    }
}

/// Returns a message to the stream it was spooled on behalf of, without
/// advancing its routing history any further — used when a segment
/// can't be opened for writing.
fn route_to_origin(shared: &Shared, mut msg: Message, origin: StreamId) {
    msg.set_stream_id(origin);
    deliver_best_effort(&shared.stream_registry, msg);
}

fn route_to_drop_stream(shared: &Shared, msg: Message) {
    let routed = msg.routed(shared.drop_stream);
    deliver_best_effort(&shared.stream_registry, routed);
}

async fn write_to_file(shared: &Arc<Shared>, msg: Message) -> LoopControl {
    let prev_id = msg.prev_stream_id();
    let spool = resolve_or_create_spool_file(shared, prev_id);
    if let Err(e) = spool.ensure_open() {
        tracing::warn!(
            stream = spool.stream_name(),
            error = %e,
            "spool segment unavailable, routing message back to origin"
        );
        route_to_origin(shared, msg, prev_id);
        return LoopControl::Continue;
    }
    let (payload, _) = shared.formatter.format(&msg);
    let msg = msg.with_data(payload);
    let shared_drop = shared.clone();
    let metrics = shared.metrics.clone();
    let id = shared.id.clone();
    spool
        .write_message(msg, || true, move |dropped| {
            metrics.add(&format!("{id}:Messages-dropped"), 1);
            route_to_drop_stream(&shared_drop, dropped);
        })
        .await;
    LoopControl::Continue
}

/// Exports per-stream read/write counts and rates, then flushes any
/// spool file that reached half its batch max or its batch timeout.
async fn tick(shared: &Arc<Shared>) -> LoopControl {
    let files: Vec<Arc<SpoolFile>> = shared.spool_files.lock().values().cloned().collect();
    for file in files {
        let write_name = format!("Spooling:Write-{}", file.stream_name());
        let read_name = format!("Spooling:Read-{}", file.stream_name());
        shared.metrics.set_i(&write_name, file.written_count() as i64);
        shared.metrics.set_i(&read_name, file.read_count() as i64);
        shared.metrics.set_f(&format!("{write_name}Sec"), shared.metrics.rate(&write_name));
        shared.metrics.set_f(&format!("{read_name}Sec"), shared.metrics.rate(&read_name));

        if file.reached_half_batch(shared.batch_max_count) || file.reached_batch_timeout(shared.batch_timeout) {
            file.flush().await;
        }
    }
    LoopControl::Continue
}

/// Persists messages routed to it on disk, keyed by the stream they were
/// dropped from, and hands them back to the routing fabric once a
/// downstream producer is reachable again (via [`crate::replay`]).
pub struct SpoolingProducer {
    stream_registry: Arc<StreamRegistry>,
    metrics: Arc<MetricsRegistry>,
    base: Option<ProducerBase>,
    handle: Option<ProducerHandle>,
    shared: Option<Arc<Shared>>,
}

impl SpoolingProducer {
    pub fn new(stream_registry: Arc<StreamRegistry>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            stream_registry,
            metrics,
            base: None,
            handle: None,
            shared: None,
        }
    }

    /// The set of `SpoolFile`s this instance has opened, for the
    /// independent replay loop to walk. Only meaningful after
    /// `configure` has run.
    pub fn spool_files(&self) -> Vec<Arc<SpoolFile>> {
        match &self.shared {
            Some(shared) => shared.spool_files.lock().values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn base_path(&self) -> Option<&PathBuf> {
        self.shared.as_ref().map(|s| &s.base_path)
    }

    /// The handle the supervisor registers into the `StreamRegistry` and
    /// uses for ordered shutdown. `None` until `configure` has run.
    pub fn handle(&self) -> Option<ProducerHandle> {
        self.handle.clone()
    }

    /// The shared spool-file table and routing handle, for wiring an
    /// independent [`crate::replay`] task once `configure` has run.
    /// `None` until `configure` has run.
    pub fn shared_state(&self) -> Option<Arc<Shared>> {
        self.shared.clone()
    }
}

#[async_trait]
impl Configurable for SpoolingProducer {
    async fn configure(&mut self, config: &PluginConfig) -> anyhow::Result<()> {
        let id = config.id();
        let channel_capacity = config.channel_capacity(256);
        let channel_timeout = config.channel_timeout(1_000);
        let shutdown_timeout = config.shutdown_timeout(5_000);
        let (base, handle) = ProducerBase::new(
            id.as_str(),
            channel_capacity,
            channel_timeout,
            shutdown_timeout,
            self.metrics.clone(),
        );

        let drop_stream = self.stream_registry.register(&config.drop_stream());
        for stream_name in config.get_stream_list() {
            let stream_id = self.stream_registry.register(&stream_name);
            self.stream_registry.subscribe(stream_id, handle.message_sender());
        }

        // The spooled wire format has to round-trip byte-for-byte on
        // replay, so this producer always pins its Formatter to
        // `format.Binary` regardless of what the record configures —
        // a user-requested JSON/envelope formatter would otherwise
        // corrupt what `wire::decode_message` expects to read back.
        let mut pinned = config.clone();
        pinned.override_value("Formatter", serde_yaml::Value::String("format.Binary".to_string()));
        let formatter: Box<dyn Formatter> = match pinned.formatter().as_deref() {
            Some("format.Binary") => Box::new(BinaryFormatter),
            _ => unreachable!("Formatter is always overridden to format.Binary above"),
        };

        self.shared = Some(Arc::new(Shared {
            id: Arc::from(id.as_str()),
            stream_registry: self.stream_registry.clone(),
            metrics: self.metrics.clone(),
            base_path: PathBuf::from(config.get_str("Path", "./spool")),
            max_file_size_mb: config.get_u64("MaxFileSizeMB", 128),
            max_file_age_min: config.get_u64("MaxFileAgeMin", 10),
            batch_max_count: config.get_u64("BatchMaxCount", 100) as usize,
            batch_timeout: Duration::from_secs(config.get_u64("BatchTimeoutSec", 5)),
            drop_stream,
            spool_files: Mutex::new(HashMap::new()),
            formatter,
        }));
        self.base = Some(base);
        self.handle = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl Producer for SpoolingProducer {
    async fn produce(&mut self) -> anyhow::Result<()> {
        let base = self
            .base
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("SpoolingProducer.produce called before configure"))?;
        let shared = self
            .shared
            .clone()
            .ok_or_else(|| anyhow::anyhow!("SpoolingProducer.produce called before configure"))?;

        base.state.set(PluginState::Active);

        let shared_msg = shared.clone();
        let shared_tick = shared.clone();
        base.ticker_message_control_loop(
            Duration::from_secs(1),
            move |msg| {
                let shared = shared_msg.clone();
                async move { write_to_file(&shared, msg).await }
            },
            |ctrl| async move {
                match ctrl {
                    ControlMessage::StopProducer | ControlMessage::StopConsumer => LoopControl::Stop,
                    _ => LoopControl::Continue,
                }
            },
            move || {
                let shared = shared_tick.clone();
                async move { tick(&shared).await }
            },
        )
        .await;

        base.state.set(PluginState::Stopping);
        let remaining = base.drain_pending();
        for msg in remaining {
            write_to_file(&shared, msg).await;
        }
        let shutdown_timeout = base.shutdown_timeout;
        let files: Vec<Arc<SpoolFile>> = shared.spool_files.lock().values().cloned().collect();
        for file in files {
            let shared_drop = shared.clone();
            file.close(shutdown_timeout, move |dropped| {
                route_to_drop_stream(&shared_drop, dropped);
            })
            .await;
        }
        base.state.set(PluginState::Dead);
        Ok(())
    }
}

impl RegisteredPlugin for SpoolingProducer {
    fn state(&self) -> PluginState {
        self.base.as_ref().map(|b| b.state.get()).unwrap_or(PluginState::Initializing)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gollum_core::{hash_stream_name, SequenceGenerator};
    use std::collections::HashMap as StdHashMap;

    fn test_config(path: &std::path::Path) -> PluginConfig {
        let mut values = StdHashMap::new();
        values.insert("ID".to_string(), serde_yaml::Value::String("spool1".to_string()));
        values.insert(
            "Path".to_string(),
            serde_yaml::Value::String(path.to_string_lossy().to_string()),
        );
        values.insert("Stream".to_string(), serde_yaml::Value::String("spool-in".to_string()));
        values.insert("BatchMaxCount".to_string(), serde_yaml::Value::Number(4.into()));
        PluginConfig::new(values)
    }

    #[tokio::test]
    async fn configure_subscribes_to_declared_streams() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(StreamRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let mut producer = SpoolingProducer::new(registry.clone(), metrics);
        producer.configure(&test_config(dir.path())).await.unwrap();

        let id = registry.register("spool-in");
        let seq = SequenceGenerator::new();
        let msg = Message::new(b"hi".to_vec(), hash_stream_name("alerts"), &seq).routed(id);
        let targets = registry.route(msg);
        assert_eq!(targets.len(), 1);
    }

    #[tokio::test]
    async fn write_then_close_persists_a_segment() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(StreamRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let mut producer = SpoolingProducer::new(registry.clone(), metrics);
        producer.configure(&test_config(dir.path())).await.unwrap();

        let shared = producer.shared.clone().unwrap();
        let seq = SequenceGenerator::new();
        let original = hash_stream_name("alerts");
        let msg = Message::new(b"hi".to_vec(), original, &seq).routed(hash_stream_name("spool-in"));
        write_to_file(&shared, msg).await;

        let files = producer.spool_files();
        assert_eq!(files.len(), 1);
        files[0].close(Duration::from_secs(1), |_| {}).await;
        assert_eq!(files[0].sealed_segments().unwrap().len(), 1);
    }

    /// A record that asks for a different formatter must still end up
    /// pinned to `format.Binary` — the spooled bytes have to decode
    /// with `wire::decode_message` on replay regardless of user intent.
    #[tokio::test]
    async fn configure_pins_formatter_regardless_of_requested_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.override_value("Formatter", serde_yaml::Value::String("format.Json".to_string()));

        let registry = Arc::new(StreamRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let mut producer = SpoolingProducer::new(registry, metrics);
        producer.configure(&config).await.unwrap();

        let shared = producer.shared.clone().unwrap();
        let seq = SequenceGenerator::new();
        let original = hash_stream_name("alerts");
        let msg = Message::new(b"hi".to_vec(), original, &seq).routed(hash_stream_name("spool-in"));
        let (payload, _) = shared.formatter.format(&msg);
        assert_eq!(payload, b"hi");
    }
}
