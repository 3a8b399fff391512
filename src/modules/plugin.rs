//! Module plugin contract. Every module that ships Rust behaviour
//! implements [`ModulePlugin`] and is registered at startup through a
//! [`PluginSet`]; modules without behaviour (data and views only) need no
//! plugin at all.

use crate::core::error::ChassisError;
use crate::core::provider::DataProvider;
use crate::core::registry::{ModelDescriptor, ModelRegistry};
use crate::modules::descriptor::ModuleDescriptor;
use std::collections::BTreeMap;

/// Everything a lifecycle hook may inspect. Hooks receive the context
/// explicitly; there is no ambient application global to reach for.
pub struct HookArgs<'a> {
    pub descriptor: &'a ModuleDescriptor,
    pub registry: &'a ModelRegistry,
    pub provider: &'a dyn DataProvider,
    /// True when a sync is in progress (the module may be mid-install or
    /// mid-update).
    pub sync: bool,
}

/// Compile-time behaviour contribution of one module. All hooks default
/// to no-ops so a plugin only overrides what it needs.
pub trait ModulePlugin: Send + Sync {
    /// Must match the module directory name of the module it belongs to.
    fn name(&self) -> &str;

    /// Record models this module contributes.
    fn models(&self) -> Vec<ModelDescriptor> {
        Vec::new()
    }

    /// Runs before this module's models are registered.
    fn before_model_load(&self, _args: &HookArgs) -> Result<(), ChassisError> {
        Ok(())
    }

    /// Runs after this module's models are registered.
    fn after_model_load(&self, _args: &HookArgs) -> Result<(), ChassisError> {
        Ok(())
    }

    /// Runs after this module's data files have been imported (or, when
    /// nothing needed importing, after the import stage was skipped).
    fn after_data_load(&self, _args: &HookArgs) -> Result<(), ChassisError> {
        Ok(())
    }

    /// Runs once every module has finished loading.
    fn after_app_load(&self, _args: &HookArgs) -> Result<(), ChassisError> {
        Ok(())
    }
}

/// Plugins keyed by module name, assembled in `main` before the
/// application starts. Registration is explicit; nothing is discovered by
/// scanning at runtime.
#[derive(Default)]
pub struct PluginSet {
    plugins: BTreeMap<String, Box<dyn ModulePlugin>>,
}

impl PluginSet {
    pub fn new() -> PluginSet {
        PluginSet::default()
    }

    pub fn register(&mut self, plugin: Box<dyn ModulePlugin>) -> Result<(), ChassisError> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(ChassisError::Validation(format!(
                "a plugin for module '{}' is already registered",
                name
            )));
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn get(&self, module: &str) -> Option<&dyn ModulePlugin> {
        self.plugins.get(module).map(|plugin| plugin.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
