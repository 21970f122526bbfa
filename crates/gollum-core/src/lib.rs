//! Message model, configuration, plugin traits, and the process-wide
//! registries shared by every crate in the pipeline runtime.

pub mod batch;
pub mod config;
pub mod error;
pub mod formatters;
pub mod message;
pub mod metrics;
pub mod plugin;
pub mod plugin_registry;
pub mod type_registry;

pub use batch::MessageBatch;
pub use config::{parse_plugin_records, PluginConfig, PluginRecord};
pub use error::{Capability, GollumError};
pub use formatters::{BinaryFormatter, IdentityFormatter, SequenceFormatter};
pub use message::{
    hash_stream_name, Message, NullSourceHandle, SequenceGenerator, SourceHandle, StreamId,
    DROPPED_STREAM, GOLLUM_STREAM, WILDCARD_STREAM,
};
pub use metrics::MetricsRegistry;
pub use plugin::{
    Configurable, ControlMessage, Consumer, Dispatch, Filter, Formatter, PluginState,
    PluginStateCell, Producer, RegisteredPlugin, StreamPlugin,
};
pub use plugin_registry::PluginRegistry;
pub use type_registry::TypeRegistry;
