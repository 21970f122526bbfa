//! Capability traits every plugin kind implements, and the plugin
//! instance state machine.

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

use crate::config::PluginConfig;
use crate::message::Message;

/// Lifecycle state of a running plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Initializing,
    Active,
    WaitingForFuse,
    Stopping,
    Dead,
}

impl PluginState {
    fn to_u8(self) -> u8 {
        match self {
            PluginState::Initializing => 0,
            PluginState::Active => 1,
            PluginState::WaitingForFuse => 2,
            PluginState::Stopping => 3,
            PluginState::Dead => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => PluginState::Initializing,
            1 => PluginState::Active,
            2 => PluginState::WaitingForFuse,
            3 => PluginState::Stopping,
            _ => PluginState::Dead,
        }
    }
}

/// Atomically-readable plugin state, shared between the plugin's own
/// worker tasks and external queriers (e.g. `PluginRegistry::get_with_state`).
#[derive(Debug)]
pub struct PluginStateCell(AtomicU8);

impl Default for PluginStateCell {
    fn default() -> Self {
        Self(AtomicU8::new(PluginState::Initializing.to_u8()))
    }
}

impl PluginStateCell {
    pub fn get(&self) -> PluginState {
        PluginState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: PluginState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

/// Control messages delivered over a plugin's control channel, with
/// priority over data messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    StopConsumer,
    StopProducer,
    FuseActive,
    FuseBurn,
    Roll,
}

/// Base trait every plugin kind (`Consumer`, `Producer`, `Formatter`,
/// `Filter`, `StreamPlugin`) is configured through.
#[async_trait]
pub trait Configurable: Send + Sync {
    /// Binds the plugin to its parsed configuration. Errors here are
    /// fatal to plugin startup.
    async fn configure(&mut self, config: &PluginConfig) -> anyhow::Result<()>;
}

/// A data source: produces messages onto a stream.
#[async_trait]
pub trait Consumer: Configurable {
    async fn consume(&mut self) -> anyhow::Result<()>;
}

/// A data sink: consumes messages delivered to it.
#[async_trait]
pub trait Producer: Configurable {
    async fn produce(&mut self) -> anyhow::Result<()>;
}

/// A per-message payload transform. Returns the (possibly new) payload
/// together with a possibly new target stream; never mutates the
/// message it was given in place.
pub trait Formatter: Send + Sync {
    fn format(&self, msg: &Message) -> (Vec<u8>, Option<u64>);
}

/// A per-message veto. Returning `false` drops the message.
pub trait Filter: Send + Sync {
    fn accepts(&self, msg: &Message) -> bool;
}

/// Outcome of a stream plugin's dispatch decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Deliver to these subscriber indices (into the stream's producer
    /// list) directly.
    Targets(Vec<usize>),
    /// The message was re-routed onto a different stream (its
    /// `stream_id`/`prev_stream_id` were already updated); the caller
    /// must re-resolve dispatch against the new stream instead of the
    /// original one.
    Rerouted,
}

/// Policy for how a stream selects which of its subscribed producers
/// receive a given message.
pub trait StreamPlugin: Send + Sync {
    fn dispatch(&self, msg: &mut Message, subscriber_count: usize) -> Dispatch;
}

/// What the `PluginRegistry` stores: enough to query liveness without
/// knowing the plugin's concrete kind, plus an escape hatch back to it.
pub trait RegisteredPlugin: Send + Sync {
    fn state(&self) -> PluginState;
    fn as_any(&self) -> &dyn std::any::Any;
}

