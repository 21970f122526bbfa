//! Discards every message delivered to it. Useful as a pipeline
//! terminus in tests and as the target for streams nobody downstream
//! cares about.

use std::sync::Arc;

use async_trait::async_trait;

use gollum_core::{
    Configurable, ControlMessage, MetricsRegistry, PluginConfig, PluginState, Producer,
    RegisteredPlugin,
};
use gollum_runtime::{LoopControl, ProducerBase, ProducerHandle, StreamRegistry};

pub struct NullProducer {
    stream_registry: Arc<StreamRegistry>,
    metrics: Arc<MetricsRegistry>,
    base: Option<ProducerBase>,
    handle: Option<ProducerHandle>,
}

impl NullProducer {
    pub fn new(stream_registry: Arc<StreamRegistry>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            stream_registry,
            metrics,
            base: None,
            handle: None,
        }
    }

    pub fn handle(&self) -> Option<ProducerHandle> {
        self.handle.clone()
    }
}

#[async_trait]
impl Configurable for NullProducer {
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

        self.base = Some(base);
        self.handle = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl Producer for NullProducer {
    async fn produce(&mut self) -> anyhow::Result<()> {
        let base = self
            .base
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("NullProducer.produce called before configure"))?;
        let id = base.id.clone();
        let metrics = base.metrics.clone();

        base.state.set(PluginState::Active);
        base.message_control_loop(
            move |_msg| {
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

        base.drain_pending();
        base.state.set(PluginState::Dead);
        Ok(())
    }
}

impl RegisteredPlugin for NullProducer {
    fn state(&self) -> PluginState {
        self.base.as_ref().map(|b| b.state.get()).unwrap_or(PluginState::Initializing)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
