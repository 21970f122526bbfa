//! Generic batching producer over an abstract [`Transport`] — the
//! exemplar spec.md §4.6 describes as Scribe: adaptive window sizing
//! under throttling, reconnect-on-error, fuse coordination.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gollum_core::{
    Configurable, ControlMessage, Message, MessageBatch, MetricsRegistry, PluginConfig,
    PluginState, Producer, RegisteredPlugin, StreamId,
};
use gollum_runtime::{monitor_fuse, Fuse, LoopControl, ProducerBase, ProducerHandle, StreamRegistry};

use crate::transport::{SendOutcome, Transport};

/// State shared between the producer's own loop and the independent
/// fuse-monitor task spawned by [`BatchedProducer::spawn_fuse_monitor`].
struct Shared<T: Transport> {
    id: Arc<str>,
    stream_registry: Arc<StreamRegistry>,
    metrics: Arc<MetricsRegistry>,
    drop_stream: StreamId,
    category_map: HashMap<String, String>,
    batch_flush_count: usize,
    batch_timeout: Duration,
    max_retries: u32,
    max_sleep: Duration,
    window_size: AtomicUsize,
    transport: AsyncMutex<T>,
    fuse: Arc<Fuse>,
    control_tx: mpsc::Sender<ControlMessage>,
}

fn route_to_drop_stream<T: Transport>(shared: &Shared<T>, msg: Message) {
    let routed = msg.routed(shared.drop_stream);
    for (tx, m) in shared.stream_registry.route(routed) {
        let _ = tx.try_send(m);
    }
}

fn drop_suffix<T: Transport>(shared: &Shared<T>, messages: &[Message]) {
    if messages.is_empty() {
        return;
    }
    shared.metrics.add(&format!("{}:Messages-dropped", shared.id), messages.len() as i64);
    for msg in messages {
        route_to_drop_stream(shared, msg.clone());
    }
}

fn category_for<T: Transport>(shared: &Shared<T>, msg: &Message) -> String {
    shared
        .stream_registry
        .resolve_name(msg.prev_stream_id())
        .and_then(|name| shared.category_map.get(&name).cloned())
        .unwrap_or_default()
}

/// Opens (or reopens) the transport connection. On success, clears the
/// fuse and notifies the producer's own control channel — the "also
/// rearms the fuse" behavior spec.md §4.6 attributes to this helper,
/// whether it's called inline after a flush error or from the
/// independent fuse-monitor task.
async fn try_open_connection<T: Transport>(shared: &Shared<T>) -> bool {
    let opened = shared.transport.lock().await.open().await;
    match opened {
        Ok(()) => {
            shared.fuse.clear();
            let _ = shared.control_tx.send(ControlMessage::FuseActive).await;
            true
        }
        Err(e) => {
            tracing::warn!(producer = %shared.id, error = %e, "failed to (re)open transport connection");
            false
        }
    }
}

/// Ships `[idxStart, idxStart + windowSize)` slices of `messages` until
/// drained, halving the window under `TryLater` and growing it after a
/// full drain, per spec.md §4.6 and the adaptive-window testable
/// property in §8.
async fn flush_batch<T: Transport>(shared: &Shared<T>, messages: Vec<Message>) {
    let total = messages.len();
    if total == 0 {
        return;
    }
    let category = category_for(shared, &messages[0]);
    let mut idx = 0usize;
    let mut retries = 0u32;

    while idx < total {
        let window = shared.window_size.load(Ordering::Relaxed).clamp(1, total - idx);
        let slice = &messages[idx..idx + window];
        let outcome = shared.transport.lock().await.send(&category, slice).await;
        match outcome {
            Ok(SendOutcome::Ok) => {
                idx += window;
                retries = 0;
                shared.metrics.add(&format!("{}:Messages-ok", shared.id), window as i64);
                if idx >= total {
                    // Full drain: grow the window by half the remaining
                    // gap to `total`, never past it. A no-op when the
                    // window already equals `total` (settling Open
                    // Question ii).
                    let grown = (window + (total - window) / 2).min(total).max(1);
                    shared.window_size.store(grown, Ordering::Relaxed);
                    shared.metrics.set_i(&format!("{}:WindowSize", shared.id), grown as i64);
                }
            }
            Ok(SendOutcome::TryLater) => {
                let halved = (window / 2).max(1);
                shared.window_size.store(halved, Ordering::Relaxed);
                shared.metrics.set_i(&format!("{}:WindowSize", shared.id), halved as i64);
                retries += 1;
                if retries > shared.max_retries {
                    tracing::warn!(
                        producer = %shared.id,
                        "batch flush exhausted retries under throttling, dropping unsent suffix"
                    );
                    drop_suffix(shared, &messages[idx..]);
                    return;
                }
                tokio::time::sleep(shared.max_sleep / shared.max_retries.max(1)).await;
            }
            Err(e) => {
                tracing::warn!(producer = %shared.id, error = %e, "batch flush failed, forcing reconnect");
                shared.transport.lock().await.close().await;
                if !try_open_connection(shared).await {
                    shared.fuse.blow();
                }
                drop_suffix(shared, &messages[idx..]);
                return;
            }
        }
    }
}

async fn on_message<T: Transport>(shared: &Arc<Shared<T>>, batch: &Arc<MessageBatch>, msg: Message) -> LoopControl {
    let shared_drop = shared.clone();
    let shared_flush = shared.clone();
    let fuse = shared.fuse.clone();
    batch
        .append_or_flush(
            msg,
            move || !fuse.is_blown(),
            move |dropped| route_to_drop_stream(&shared_drop, dropped),
            move |msgs| {
                let shared = shared_flush.clone();
                async move { flush_batch(&shared, msgs).await }
            },
        )
        .await;
    LoopControl::Continue
}

async fn tick<T: Transport>(shared: &Arc<Shared<T>>, batch: &Arc<MessageBatch>) -> LoopControl {
    if batch.reached_size_threshold(shared.batch_flush_count) || batch.reached_time_threshold(shared.batch_timeout) {
        let shared_flush = shared.clone();
        batch
            .flush(move |msgs| {
                let shared = shared_flush.clone();
                async move { flush_batch(&shared, msgs).await }
            })
            .await;
    }
    LoopControl::Continue
}

/// Delivers batched messages to a downstream sink through an abstract
/// [`Transport`], with the adaptive-window retry contract spec.md §4.6
/// names (concrete transports — Scribe, Kafka, ElasticSearch — are
/// external collaborators that implement the trait).
pub struct BatchedProducer<T: Transport> {
    stream_registry: Arc<StreamRegistry>,
    metrics: Arc<MetricsRegistry>,
    transport: Option<T>,
    base: Option<ProducerBase>,
    handle: Option<ProducerHandle>,
    batch: Option<Arc<MessageBatch>>,
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Transport> BatchedProducer<T> {
    pub fn new(stream_registry: Arc<StreamRegistry>, metrics: Arc<MetricsRegistry>, transport: T) -> Self {
        Self {
            stream_registry,
            metrics,
            transport: Some(transport),
            base: None,
            handle: None,
            batch: None,
            shared: None,
        }
    }

    pub fn handle(&self) -> Option<ProducerHandle> {
        self.handle.clone()
    }
}

impl<T: Transport + 'static> BatchedProducer<T> {
    /// Spawns the independent task the supervisor uses to poll
    /// `CheckFuse` while this producer's fuse is blown (spec.md §4.4).
    /// Returns `None` until `configure` has run.
    pub fn spawn_fuse_monitor(&self, poll_interval: Duration, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let shared = self.shared.clone()?;
        let fuse = shared.fuse.clone();
        let control_tx = shared.control_tx.clone();
        Some(tokio::spawn(async move {
            monitor_fuse(
                fuse,
                control_tx,
                move || {
                    let shared = shared.clone();
                    async move { try_open_connection(&shared).await }
                },
                poll_interval,
                cancel,
            )
            .await;
        }))
    }
}

#[async_trait]
impl<T: Transport + 'static> Configurable for BatchedProducer<T> {
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

        let batch_max_count = config.get_u64("BatchMaxCount", 100).max(1) as usize;
        let batch_flush_count = (config.get_u64("BatchFlushCount", batch_max_count as u64) as usize)
            .clamp(1, batch_max_count);
        let batch_timeout = Duration::from_secs(config.get_u64("BatchTimeoutSec", 5).max(1));
        let max_retries = config.get_u64("MaxRetries", 3).max(1) as u32;
        let max_sleep = Duration::from_millis(config.get_u64("MaxSleepTimeMs", 1_000));

        let mut transport = self
            .transport
            .take()
            .ok_or_else(|| anyhow::anyhow!("BatchedProducer.configure called more than once"))?;
        transport.configure(config).await?;

        self.shared = Some(Arc::new(Shared {
            id: Arc::from(id.as_str()),
            stream_registry: self.stream_registry.clone(),
            metrics: self.metrics.clone(),
            drop_stream,
            category_map: config.get_str_map("Category"),
            batch_flush_count,
            batch_timeout,
            max_retries,
            max_sleep,
            window_size: AtomicUsize::new(batch_flush_count),
            transport: AsyncMutex::new(transport),
            fuse: base.fuse.clone(),
            control_tx: handle.control_sender(),
        }));
        self.batch = Some(Arc::new(MessageBatch::new(batch_max_count)));
        self.base = Some(base);
        self.handle = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + 'static> Producer for BatchedProducer<T> {
    async fn produce(&mut self) -> anyhow::Result<()> {
        let base = self
            .base
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("BatchedProducer.produce called before configure"))?;
        let shared = self
            .shared
            .clone()
            .ok_or_else(|| anyhow::anyhow!("BatchedProducer.produce called before configure"))?;
        let batch = self
            .batch
            .clone()
            .ok_or_else(|| anyhow::anyhow!("BatchedProducer.produce called before configure"))?;

        base.state.set(PluginState::Active);
        if !try_open_connection(&shared).await {
            shared.fuse.blow();
            base.state.set(PluginState::WaitingForFuse);
        }

        let tick_interval = shared.batch_timeout.min(Duration::from_secs(1));
        let s_msg = shared.clone();
        let b_msg = batch.clone();
        let s_tick = shared.clone();
        let b_tick = batch.clone();
        base.ticker_message_control_loop(
            tick_interval,
            move |msg| {
                let shared = s_msg.clone();
                let batch = b_msg.clone();
                async move { on_message(&shared, &batch, msg).await }
            },
            |ctrl| async move {
                match ctrl {
                    ControlMessage::StopProducer | ControlMessage::StopConsumer => LoopControl::Stop,
                    _ => LoopControl::Continue,
                }
            },
            move || {
                let shared = s_tick.clone();
                let batch = b_tick.clone();
                async move { tick(&shared, &batch).await }
            },
        )
        .await;

        base.state.set(PluginState::Stopping);
        let remaining = base.drain_pending();
        for msg in remaining {
            on_message(&shared, &batch, msg).await;
        }
        let shutdown_timeout = base.shutdown_timeout;
        let s_flush = shared.clone();
        let s_drop = shared.clone();
        batch
            .close(
                move |msgs| {
                    let shared = s_flush.clone();
                    async move { flush_batch(&shared, msgs).await }
                },
                shutdown_timeout,
                move |dropped| route_to_drop_stream(&s_drop, dropped),
            )
            .await;
        shared.transport.lock().await.close().await;
        base.state.set(PluginState::Dead);
        Ok(())
    }
}

impl<T: Transport + 'static> RegisteredPlugin for BatchedProducer<T> {
    fn state(&self) -> PluginState {
        self.base.as_ref().map(|b| b.state.get()).unwrap_or(PluginState::Initializing)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
