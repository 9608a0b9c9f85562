//! Plugin registry: validates descriptors and fixes the invocation order.

use crate::error::{HookError, Result};
use crate::plugin::Plugin;
use std::collections::HashSet;

/// Holds the plugins for one build in invocation order: priority
/// descending, ties broken by declaration order.
pub struct PluginRegistry {
    plugins: Vec<Plugin>,
}

impl PluginRegistry {
    /// Build a registry from declaration-ordered plugins. Fails if two
    /// plugins share a name.
    pub fn new(plugins: Vec<Plugin>) -> Result<PluginRegistry> {
        let mut seen = HashSet::new();
        for plugin in &plugins {
            if !seen.insert(plugin.name.clone()) {
                return Err(HookError::DuplicatePluginName(plugin.name.clone()).into());
            }
        }

        // Stable sort keyed on priority only, so declaration order is the
        // tie-breaker.
        let mut ordered: Vec<Plugin> = plugins;
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        tracing::debug!(
            order = ?ordered.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "plugin invocation order fixed"
        );

        Ok(PluginRegistry { plugins: ordered })
    }

    /// Plugins in invocation order.
    pub fn ordered(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
