//! Error taxonomy shared across the runtime.

/// Capability a caller asked the type registry to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Consumer,
    Producer,
    Formatter,
    Filter,
    Stream,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::Consumer => "Consumer",
            Capability::Producer => "Producer",
            Capability::Formatter => "Formatter",
            Capability::Filter => "Filter",
            Capability::Stream => "Stream",
        };
        f.write_str(s)
    }
}

/// Configuration-time and runtime errors raised by the message plane.
#[derive(Debug, thiserror::Error)]
pub enum GollumError {
    /// No registered plugin type matches the requested name.
    #[error("unknown plugin type: {0}")]
    UnknownPluginType(String),

    /// More than one registered plugin type's suffix matches the
    /// requested name.
    #[error("ambiguous plugin type: {0} matches more than one registration")]
    AmbiguousPluginType(String),

    /// The resolved plugin type does not implement the requested
    /// capability.
    #[error("plugin type {type_name} does not implement {capability}")]
    CapabilityMismatch {
        type_name: String,
        capability: Capability,
    },

    /// `Configure` returned an error on a newly constructed plugin.
    #[error("failed to configure plugin {id}: {source}")]
    ConfigureFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A `RegisterUnique` call collided with an already-registered ID.
    #[error("plugin id already registered: {0}")]
    DuplicateId(String),

    /// A message channel between plugins was unexpectedly closed.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
