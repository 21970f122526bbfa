//! Minimal sink that prints every delivered message to stdout, applying
//! its configured formatter first. Grounded in the teacher's own
//! `StdoutSink`: a thin struct wrapping a plain receive loop.

use std::sync::Arc;

use async_trait::async_trait;

use gollum_core::{
    Configurable, ControlMessage, Formatter, IdentityFormatter, Message, MetricsRegistry,
    PluginConfig, PluginState, Producer, RegisteredPlugin,
};
use gollum_runtime::{LoopControl, ProducerBase, ProducerHandle, StreamRegistry};

/// Prints each message's formatted payload to stdout, one line per
/// message. Useful for local debugging of a pipeline topology.
pub struct StdoutProducer {
    stream_registry: Arc<StreamRegistry>,
    metrics: Arc<MetricsRegistry>,
    formatter: Box<dyn Formatter>,
    base: Option<ProducerBase>,
    handle: Option<ProducerHandle>,
}

impl StdoutProducer {
    pub fn new(stream_registry: Arc<StreamRegistry>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            stream_registry,
            metrics,
            formatter: Box::new(IdentityFormatter),
            base: None,
            handle: None,
        }
    }

    pub fn handle(&self) -> Option<ProducerHandle> {
        self.handle.clone()
    }
}

#[async_trait]
impl Configurable for StdoutProducer {
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

        for stream_name in config.get_stream_list() {
            let stream_id = self.stream_registry.register(&stream_name);
            self.stream_registry.subscribe(stream_id, handle.message_sender());
        }

        if config.formatter().as_deref() == Some("format.Sequence") {
            self.formatter = Box::new(gollum_core::SequenceFormatter::new());
        }

        self.base = Some(base);
        self.handle = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl Producer for StdoutProducer {
    async fn produce(&mut self) -> anyhow::Result<()> {
        let base = self
            .base
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("StdoutProducer.produce called before configure"))?;
        let id = base.id.clone();
        let metrics = base.metrics.clone();
        let formatter = &self.formatter;

        base.state.set(PluginState::Active);
        base.message_control_loop(
            move |msg: Message| {
                let (payload, _) = formatter.format(&msg);
                println!("{}", String::from_utf8_lossy(&payload));
                metrics.add(&format!("{id}:Messages-ok"), 1);
                async { LoopControl::Continue }
            },
            |ctrl| async move {
                match ctrl {
                    ControlMessage::StopProducer | ControlMessage::StopConsumer => LoopControl::Stop,
                    _ => LoopControl::Continue,
                }
            },
        )
        .await;

        let remaining = base.drain_pending();
        for msg in remaining {
            let (payload, _) = self.formatter.format(&msg);
            println!("{}", String::from_utf8_lossy(&payload));
        }
        base.state.set(PluginState::Dead);
        Ok(())
    }
}

impl RegisteredPlugin for StdoutProducer {
    fn state(&self) -> PluginState {
        self.base.as_ref().map(|b| b.state.get()).unwrap_or(PluginState::Initializing)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
