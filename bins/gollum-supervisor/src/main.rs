//! Reads a YAML list of plugin records (spec.md §6's shape) and runs
//! the built-in producer and consumer types under a
//! [`gollum_runtime::Supervisor`] until Ctrl-C, mirroring the teacher's
//! `rde-cli` bootstrap: parse config, spawn one task per stage, select
//! on Ctrl-C vs. task completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gollum_core::{
    parse_plugin_records, Configurable, Consumer, MetricsRegistry, PluginConfig, PluginRegistry,
    Producer, TypeRegistry,
};
use gollum_producers::{BatchedProducer, NullProducer, SequenceConsumer, StdoutProducer, StdoutTransport};
use gollum_runtime::{ProducerHandle, StreamRegistry, Supervisor};
use gollum_spool::SpoolingProducer;

/// Pipeline runner for a Gollum topology described as a YAML plugin
/// record list.
#[derive(Parser, Debug)]
#[command(name = "gollum-supervisor")]
#[command(about = "Runs a Gollum pipeline topology until Ctrl-C")]
struct Args {
    /// Path to the YAML plugin record list (spec.md §6's shape).
    #[arg(short, long)]
    config: PathBuf,

    /// How often the independent spool replay task wakes to drain
    /// sealed segments, for every `producer.Spooling` instance.
    #[arg(long, default_value_t = 30)]
    replay_interval_secs: u64,

    /// How often a blown fuse is re-checked, for every
    /// `producer.Batched` instance.
    #[arg(long, default_value_t = 500)]
    fuse_poll_ms: u64,

    /// Per-producer budget when stopping during shutdown.
    #[arg(long, default_value_t = 5)]
    shutdown_timeout_secs: u64,
}

/// The concrete producer kinds this bin knows how to build from a
/// dotted plugin type name. `TypeRegistry` (below) is still populated
/// with the same constructors so its suffix-resolution and capability
/// checks are exercised by anything that calls `new_producer` directly
/// (tests, a future embedder); this enum is what the bin itself
/// instantiates, since `Box<dyn Producer>` alone doesn't expose the
/// `ProducerHandle` or producer-specific wiring (spool replay, fuse
/// monitor) the supervisor needs.
enum BuiltinProducer {
    Spooling(SpoolingProducer),
    Stdout(StdoutProducer),
    Null(NullProducer),
    Batched(BatchedProducer<StdoutTransport>),
}

impl BuiltinProducer {
    fn resolve(plugin_type: &str, stream_registry: &Arc<StreamRegistry>, metrics: &Arc<MetricsRegistry>) -> Option<Self> {
        match plugin_type {
            "producer.Spooling" => Some(Self::Spooling(SpoolingProducer::new(stream_registry.clone(), metrics.clone()))),
            "producer.Stdout" => Some(Self::Stdout(StdoutProducer::new(stream_registry.clone(), metrics.clone()))),
            "producer.Null" => Some(Self::Null(NullProducer::new(stream_registry.clone(), metrics.clone()))),
            "producer.Batched" => Some(Self::Batched(BatchedProducer::new(
                stream_registry.clone(),
                metrics.clone(),
                StdoutTransport,
            ))),
            _ => None,
        }
    }

    async fn configure(&mut self, config: &PluginConfig) -> anyhow::Result<()> {
        match self {
            Self::Spooling(p) => p.configure(config).await,
            Self::Stdout(p) => p.configure(config).await,
            Self::Null(p) => p.configure(config).await,
            Self::Batched(p) => p.configure(config).await,
        }
    }

    fn handle(&self) -> Option<ProducerHandle> {
        match self {
            Self::Spooling(p) => p.handle(),
            Self::Stdout(p) => p.handle(),
            Self::Null(p) => p.handle(),
            Self::Batched(p) => p.handle(),
        }
    }

    /// Extra per-kind tasks this producer needs alongside its own
    /// `produce()` loop: the independent spool replay reader for
    /// `producer.Spooling`, the fuse-health poller for
    /// `producer.Batched`. `None` for kinds that need neither.
    fn spawn_side_tasks(&self, args: &Args, cancel: &CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        match self {
            Self::Spooling(p) => match p.shared_state() {
                Some(shared) => {
                    let interval = Duration::from_secs(args.replay_interval_secs.max(1));
                    let cancel = cancel.child_token();
                    vec![tokio::spawn(gollum_spool::run_replay_loop(shared, interval, cancel))]
                }
                None => Vec::new(),
            },
            Self::Batched(p) => {
                let interval = Duration::from_millis(args.fuse_poll_ms.max(1));
                match p.spawn_fuse_monitor(interval, cancel.child_token()) {
                    Some(handle) => vec![handle],
                    None => Vec::new(),
                }
            }
            Self::Stdout(_) | Self::Null(_) => Vec::new(),
        }
    }

    async fn produce(mut self) {
        let result = match &mut self {
            Self::Spooling(p) => p.produce().await,
            Self::Stdout(p) => p.produce().await,
            Self::Null(p) => p.produce().await,
            Self::Batched(p) => p.produce().await,
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "producer exited with an error");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let yaml = std::fs::read_to_string(&args.config)?;
    let records = parse_plugin_records(&yaml)?;

    let type_registry = Arc::new(TypeRegistry::new());
    let plugin_registry = Arc::new(PluginRegistry::new());
    let stream_registry = Arc::new(StreamRegistry::new());
    let metrics = Arc::new(MetricsRegistry::new());
    let cancel = CancellationToken::new();
    register_builtin_types(&type_registry, &stream_registry, &metrics, &cancel);

    let supervisor = Arc::new(Supervisor::new(
        type_registry.clone(),
        plugin_registry.clone(),
        stream_registry.clone(),
        metrics.clone(),
    ));
    let mut side_tasks = Vec::new();

    for record in records {
        if record.plugin_type.starts_with("consumer.") {
            let mut consumer = type_registry.new_consumer(&record.plugin_type)?;
            consumer.configure(&record.options).await?;
            side_tasks.push(tokio::spawn(async move {
                if let Err(e) = consumer.consume().await {
                    tracing::error!(error = %e, "consumer exited with an error");
                }
            }));
            continue;
        }

        let Some(mut producer) = BuiltinProducer::resolve(&record.plugin_type, &stream_registry, &metrics) else {
            anyhow::bail!("unknown builtin plugin type: {}", record.plugin_type);
        };
        producer.configure(&record.options).await?;
        let handle = producer
            .handle()
            .ok_or_else(|| anyhow::anyhow!("{} produced no handle after configure", record.plugin_type))?;

        side_tasks.extend(producer.spawn_side_tasks(&args, &cancel));

        let id = record.options.id();
        let stream_name = record.options.get_stream_list().first().cloned().unwrap_or_default();
        let drop_stream = record.options.drop_stream();
        let join = tokio::spawn(producer.produce());
        supervisor.register_producer(id, handle, stream_name, drop_stream, join);
    }

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("received Ctrl-C, shutting down");
        }
    }

    cancel.cancel();
    supervisor.shutdown(Duration::from_secs(args.shutdown_timeout_secs.max(1))).await;
    for task in side_tasks {
        let _ = task.await;
    }
    Ok(())
}

fn register_builtin_types(
    type_registry: &TypeRegistry,
    stream_registry: &Arc<StreamRegistry>,
    metrics: &Arc<MetricsRegistry>,
    cancel: &CancellationToken,
) {
    let sr = stream_registry.clone();
    let m = metrics.clone();
    let c = cancel.clone();
    type_registry.register_consumer("consumer.Sequence", move || Box::new(SequenceConsumer::new(sr.clone(), m.clone(), c.clone())));

    let sr = stream_registry.clone();
    let m = metrics.clone();
    type_registry.register_producer("producer.Spooling", move || Box::new(SpoolingProducer::new(sr.clone(), m.clone())));

    let sr = stream_registry.clone();
    let m = metrics.clone();
    type_registry.register_producer("producer.Stdout", move || Box::new(StdoutProducer::new(sr.clone(), m.clone())));

    let sr = stream_registry.clone();
    let m = metrics.clone();
    type_registry.register_producer("producer.Null", move || Box::new(NullProducer::new(sr.clone(), m.clone())));

    let sr = stream_registry.clone();
    let m = metrics.clone();
    type_registry.register_producer("producer.Batched", move || {
        Box::new(BatchedProducer::new(sr.clone(), m.clone(), StdoutTransport))
    });
}
