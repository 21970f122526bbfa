//! Keyed by user-assigned ID; tracks the running instances the
//! supervisor has wired up.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::GollumError;
use crate::plugin::{PluginState, RegisteredPlugin};

/// Process-wide table of `ID -> running plugin instance`.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn RegisteredPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.plugins.write().clear();
    }

    /// Registers `plugin` under `id`. An empty ID means "do not
    /// register" and is a no-op.
    pub fn register(&self, id: &str, plugin: Arc<dyn RegisteredPlugin>) {
        if id.is_empty() {
            return;
        }
        self.plugins.write().insert(id.to_string(), plugin);
    }

    /// Like `register`, but rejects an ID that's already taken.
    pub fn register_unique(
        &self,
        id: &str,
        plugin: Arc<dyn RegisteredPlugin>,
    ) -> Result<(), GollumError> {
        if id.is_empty() {
            return Ok(());
        }
        let mut plugins = self.plugins.write();
        if plugins.contains_key(id) {
            return Err(GollumError::DuplicateId(id.to_string()));
        }
        plugins.insert(id.to_string(), plugin);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RegisteredPlugin>> {
        self.plugins.read().get(id).cloned()
    }

    /// Returns `None` unless the instance is registered and not `Dead`.
    pub fn get_with_state(&self, id: &str) -> Option<Arc<dyn RegisteredPlugin>> {
        self.get(id)
            .filter(|p| !matches!(p.state(), PluginState::Dead))
    }
}
