//! Typed option lookups over a parsed plugin configuration record.

use std::collections::HashMap;
use std::time::Duration;

use serde_yaml::Value;

use crate::message::DROPPED_STREAM;

/// A single plugin record as it appears in the configuration sequence:
/// the dotted type name plus its option map.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub plugin_type: String,
    pub options: PluginConfig,
}

/// Typed option lookups, with defaults and forced overrides, plus the
/// stream list this plugin instance is bound to.
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    values: HashMap<String, Value>,
    overrides: HashMap<String, Value>,
}

impl PluginConfig {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self {
            values,
            overrides: HashMap::new(),
        }
    }

    /// Forcibly replaces a user-provided value, taking precedence over
    /// whatever was parsed from configuration. Used, e.g., by the
    /// spooling producer to pin its formatter regardless of user input.
    pub fn override_value(&mut self, key: &str, value: Value) {
        self.overrides.insert(key.to_string(), value);
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        self.overrides.get(key).or_else(|| self.values.get(key))
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.lookup(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.lookup(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.lookup(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.lookup(key).and_then(Value::as_i64).unwrap_or(default)
    }

    pub fn get_duration_ms(&self, key: &str, default_ms: u64) -> Duration {
        Duration::from_millis(self.get_u64(key, default_ms))
    }

    /// Reads a mapping-valued option as a plain string->string table
    /// (used by `Category`, which maps a stream name to a producer's
    /// external category name). Empty if absent or not a mapping.
    pub fn get_str_map(&self, key: &str) -> HashMap<String, String> {
        match self.lookup(key) {
            Some(Value::Mapping(map)) => map
                .iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
                .collect(),
            _ => HashMap::new(),
        }
    }

    /// `Stream` may be a single name or a list; always returned as a
    /// list (empty if absent).
    pub fn get_stream_list(&self) -> Vec<String> {
        match self.lookup("Stream") {
            Some(Value::Sequence(seq)) => seq
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn id(&self) -> String {
        self.get_str("ID", "")
    }

    pub fn enabled(&self) -> bool {
        self.get_bool("Enable", true)
    }

    pub fn drop_stream(&self) -> String {
        self.get_str("DropStream", DROPPED_STREAM)
    }

    pub fn formatter(&self) -> Option<String> {
        self.lookup("Formatter").and_then(Value::as_str).map(str::to_string)
    }

    pub fn filter(&self) -> Option<String> {
        self.lookup("Filter").and_then(Value::as_str).map(str::to_string)
    }

    pub fn channel_capacity(&self, default: usize) -> usize {
        self.get_u64("Channel", default as u64) as usize
    }

    pub fn channel_timeout(&self, default_ms: u64) -> Duration {
        self.get_duration_ms("ChannelTimeoutMs", default_ms)
    }

    pub fn shutdown_timeout(&self, default_ms: u64) -> Duration {
        self.get_duration_ms("ShutdownTimeoutMs", default_ms)
    }
}

/// Parses a configuration sequence in the shape documented in spec.md
/// §6: each entry is a one-key mapping from the dotted plugin type to
/// its option table.
pub fn parse_plugin_records(yaml: &str) -> anyhow::Result<Vec<PluginRecord>> {
    let docs: Vec<HashMap<String, Value>> = serde_yaml::from_str(yaml)?;
    let mut records = Vec::with_capacity(docs.len());
    for entry in docs {
        if entry.len() != 1 {
            anyhow::bail!("plugin record must have exactly one key (the dotted type name)");
        }
        let (plugin_type, options_value) = entry.into_iter().next().expect("checked len == 1");
        let options = match options_value {
            Value::Mapping(map) => {
                let mut values = HashMap::new();
                for (k, v) in map {
                    if let Some(k) = k.as_str() {
                        values.insert(k.to_string(), v);
                    }
                }
                PluginConfig::new(values)
            }
            Value::Null => PluginConfig::default(),
            _ => anyhow::bail!("plugin options for {plugin_type} must be a mapping"),
        };
        records.push(PluginRecord { plugin_type, options });
    }
    Ok(records)
}
