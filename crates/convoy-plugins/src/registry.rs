//! Capability registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::PluginError;
use crate::shell::ShellPlugin;
use crate::traits::{Plugin, PluginOutcome, PluginRequest};
use crate::transfer::LocalTransferPlugin;

/// Capability name to plugin. Built once at startup, read-only afterwards.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in plugins for the given capabilities.
    /// Unknown names are skipped with a warning.
    pub fn builtin<'a>(capabilities: impl IntoIterator<Item = &'a str>) -> Self {
        let mut registry = Self::new();
        for capability in capabilities {
            match capability {
                convoy_core::SHELL_CAPABILITY => registry.register(ShellPlugin::new()),
                convoy_core::TRANSFER_CAPABILITY => registry.register(LocalTransferPlugin::new()),
                other => warn!(capability = %other, "No built-in plugin for capability"),
            }
        }
        registry
    }

    /// Register `plugin` under its own name.
    pub fn register(&mut self, plugin: impl Plugin + 'static) {
        let name = plugin.name().to_string();
        self.register_as(name, Arc::new(plugin));
    }

    /// Register `plugin` under `capability`.
    pub fn register_as(&mut self, capability: impl Into<String>, plugin: Arc<dyn Plugin>) {
        let capability = capability.into();
        debug!(capability = %capability, "Registering plugin");
        self.plugins.insert(capability, plugin);
    }

    /// Reconfigure the plugin registered under `capability`. Only possible
    /// while the registry is the plugin's sole owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the capability is unknown, the plugin is shared,
    /// or it rejects `options`.
    pub fn configure(
        &mut self,
        capability: &str,
        options: &serde_json::Value,
    ) -> Result<(), PluginError> {
        let plugin = self
            .plugins
            .get_mut(capability)
            .ok_or_else(|| PluginError::NotRegistered(capability.to_string()))?;
        Arc::get_mut(plugin)
            .ok_or_else(|| PluginError::ConfigError(format!("{capability} is already in use")))?
            .configure(options)
    }

    #[must_use]
    pub fn get(&self, capability: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(capability).cloned()
    }

    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.plugins.contains_key(capability)
    }

    /// Registered capability names.
    #[must_use]
    pub fn capabilities(&self) -> BTreeSet<String> {
        self.plugins.keys().cloned().collect()
    }

    /// Validate then run `request` with the plugin for `capability`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotRegistered`] for an unknown capability,
    /// [`PluginError::InvalidRequest`] if the plugin rejects the request, or
    /// whatever the plugin fails with.
    pub async fn run(
        &self,
        capability: &str,
        request: &PluginRequest,
    ) -> Result<PluginOutcome, PluginError> {
        let plugin = self
            .plugins
            .get(capability)
            .ok_or_else(|| PluginError::NotRegistered(capability.to_string()))?;

        let validation = plugin.check(request).await?;
        if !validation.valid {
            return Err(PluginError::InvalidRequest(validation.errors.join("; ")));
        }
        plugin.process(request).await
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
