//! Maps dotted plugin type names to constructors, across every
//! capability kind, in a single namespace (so ambiguity detection spans
//! kinds the way a single reflection-based registry would).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Capability, GollumError};
use crate::plugin::{Consumer, Filter, Formatter, Producer, StreamPlugin};

type ConsumerFactory = Arc<dyn Fn() -> Box<dyn Consumer> + Send + Sync>;
type ProducerFactory = Arc<dyn Fn() -> Box<dyn Producer> + Send + Sync>;
type FormatterFactory = Arc<dyn Fn() -> Box<dyn Formatter> + Send + Sync>;
type FilterFactory = Arc<dyn Fn() -> Box<dyn Filter> + Send + Sync>;
type StreamFactory = Arc<dyn Fn() -> Box<dyn StreamPlugin> + Send + Sync>;

#[derive(Clone)]
enum Entry {
    Consumer(ConsumerFactory),
    Producer(ProducerFactory),
    Formatter(FormatterFactory),
    Filter(FilterFactory),
    Stream(StreamFactory),
}

impl Entry {
    fn capability(&self) -> Capability {
        match self {
            Entry::Consumer(_) => Capability::Consumer,
            Entry::Producer(_) => Capability::Producer,
            Entry::Formatter(_) => Capability::Formatter,
            Entry::Filter(_) => Capability::Filter,
            Entry::Stream(_) => Capability::Stream,
        }
    }
}

/// Process-wide table of `name -> constructor`. Initialized lazily and
/// torn down only at exit; tests get a fresh instance via `new`/`Clear`.
#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

fn matches_query(registered: &str, query: &str) -> bool {
    registered == query || registered.ends_with(&format!(".{query}"))
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every registration. Test-only escape hatch for the
    /// process-wide singleton pattern described in spec.md §9.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn register_consumer<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Consumer> + Send + Sync + 'static,
    {
        self.entries
            .write()
            .insert(name.into(), Entry::Consumer(Arc::new(factory)));
    }

    pub fn register_producer<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Producer> + Send + Sync + 'static,
    {
        self.entries
            .write()
            .insert(name.into(), Entry::Producer(Arc::new(factory)));
    }

    pub fn register_formatter<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Formatter> + Send + Sync + 'static,
    {
        self.entries
            .write()
            .insert(name.into(), Entry::Formatter(Arc::new(factory)));
    }

    pub fn register_filter<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        self.entries
            .write()
            .insert(name.into(), Entry::Filter(Arc::new(factory)));
    }

    pub fn register_stream_plugin<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn StreamPlugin> + Send + Sync + 'static,
    {
        self.entries
            .write()
            .insert(name.into(), Entry::Stream(Arc::new(factory)));
    }

    /// Resolves `query` to exactly one registered full name: an exact
    /// match wins outright; otherwise a unique dotted-suffix match.
    fn resolve(&self, query: &str) -> Result<String, GollumError> {
        let entries = self.entries.read();
        if entries.contains_key(query) {
            return Ok(query.to_string());
        }
        let matches: Vec<&String> = entries
            .keys()
            .filter(|registered| matches_query(registered, query))
            .collect();
        match matches.len() {
            0 => Err(GollumError::UnknownPluginType(query.to_string())),
            1 => Ok(matches[0].clone()),
            _ => Err(GollumError::AmbiguousPluginType(query.to_string())),
        }
    }

    pub fn new_consumer(&self, name: &str) -> Result<Box<dyn Consumer>, GollumError> {
        let full = self.resolve(name)?;
        let entries = self.entries.read();
        match entries.get(&full) {
            Some(Entry::Consumer(f)) => Ok(f()),
            Some(other) => Err(GollumError::CapabilityMismatch {
                type_name: full,
                capability: other.capability(),
            }),
            None => Err(GollumError::UnknownPluginType(full)),
        }
    }

    pub fn new_producer(&self, name: &str) -> Result<Box<dyn Producer>, GollumError> {
        let full = self.resolve(name)?;
        let entries = self.entries.read();
        match entries.get(&full) {
            Some(Entry::Producer(f)) => Ok(f()),
            Some(other) => Err(GollumError::CapabilityMismatch {
                type_name: full,
                capability: other.capability(),
            }),
            None => Err(GollumError::UnknownPluginType(full)),
        }
    }

    pub fn new_formatter(&self, name: &str) -> Result<Box<dyn Formatter>, GollumError> {
        let full = self.resolve(name)?;
        let entries = self.entries.read();
        match entries.get(&full) {
            Some(Entry::Formatter(f)) => Ok(f()),
            Some(other) => Err(GollumError::CapabilityMismatch {
                type_name: full,
                capability: other.capability(),
            }),
            None => Err(GollumError::UnknownPluginType(full)),
        }
    }

    pub fn new_filter(&self, name: &str) -> Result<Box<dyn Filter>, GollumError> {
        let full = self.resolve(name)?;
        let entries = self.entries.read();
        match entries.get(&full) {
            Some(Entry::Filter(f)) => Ok(f()),
            Some(other) => Err(GollumError::CapabilityMismatch {
                type_name: full,
                capability: other.capability(),
            }),
            None => Err(GollumError::UnknownPluginType(full)),
        }
    }

    pub fn new_stream_plugin(&self, name: &str) -> Result<Box<dyn StreamPlugin>, GollumError> {
        let full = self.resolve(name)?;
        let entries = self.entries.read();
        match entries.get(&full) {
            Some(Entry::Stream(f)) => Ok(f()),
            Some(other) => Err(GollumError::CapabilityMismatch {
                type_name: full,
                capability: other.capability(),
            }),
            None => Err(GollumError::UnknownPluginType(full)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use async_trait::async_trait;

    struct NoopProducer;
    #[async_trait]
    impl crate::plugin::Configurable for NoopProducer {
        async fn configure(&mut self, _config: &PluginConfig) -> anyhow::Result<()> {
            Ok(())
        }
    }
    #[async_trait]
    impl Producer for NoopProducer {
        async fn produce(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn exact_match_wins_over_suffix_ambiguity() {
        let reg = TypeRegistry::new();
        reg.register_producer("producer.Scribe", || Box::new(NoopProducer));
        reg.register_producer("contrib.other.Scribe", || Box::new(NoopProducer));
        // Exact match should resolve even though two entries share a suffix.
        assert!(reg.new_producer("producer.Scribe").is_ok());
    }

    #[test]
    fn unique_suffix_resolves() {
        let reg = TypeRegistry::new();
        reg.register_producer("producer.Scribe", || Box::new(NoopProducer));
        assert!(reg.new_producer("Scribe").is_ok());
    }

    #[test]
    fn ambiguous_suffix_errors() {
        let reg = TypeRegistry::new();
        reg.register_producer("producer.Scribe", || Box::new(NoopProducer));
        reg.register_producer("contrib.other.Scribe", || Box::new(NoopProducer));
        let err = reg.new_producer("Scribe").unwrap_err();
        assert!(matches!(err, GollumError::AmbiguousPluginType(_)));
    }

    #[test]
    fn unknown_name_errors() {
        let reg = TypeRegistry::new();
        let err = reg.new_producer("producer.Nope").unwrap_err();
        assert!(matches!(err, GollumError::UnknownPluginType(_)));
    }

    #[test]
    fn capability_mismatch_detected() {
        let reg = TypeRegistry::new();
        reg.register_producer("producer.Scribe", || Box::new(NoopProducer));
        let err = reg.new_consumer("producer.Scribe").unwrap_err();
        assert!(matches!(err, GollumError::CapabilityMismatch { .. }));
    }

    #[test]
    fn clear_resets_registry() {
        let reg = TypeRegistry::new();
        reg.register_producer("producer.Scribe", || Box::new(NoopProducer));
        reg.clear();
        assert!(reg.new_producer("producer.Scribe").is_err());
    }
}
