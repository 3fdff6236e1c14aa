// src/registry.rs
//! Plugin registry.
//!
//! Lifecycle: `Registry::new()` → `register()` each plugin → share as
//! `Arc<Registry>` with the script runtime, whose builtins populate plugin
//! sources → `freeze()` once the configuration script ran → read-only for
//! the engine run → dropped.

use crate::error::{Error, Result};
use crate::ingest::pipeline::Transforms;
use crate::ingest::types::Source;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Builds a source from the arguments of one builtin call.
pub type SourceFactory = dyn Fn(BuiltinArgs) -> Result<Arc<dyn Source>> + Send + Sync;

struct Builtin {
    name: String,
    factory: Arc<SourceFactory>,
}

/// Named unit of extension: scripting builtins plus the sources they created.
pub struct Plugin {
    name: String,
    builtins: Vec<Builtin>,
    sources: Mutex<Vec<Arc<dyn Source>>>,
    frozen: AtomicBool,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            builtins: Vec::new(),
            sources: Mutex::new(Vec::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Expose `name(#{...})` to the configuration script.
    pub fn with_builtin<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(BuiltinArgs) -> Result<Arc<dyn Source>> + Send + Sync + 'static,
    {
        self.builtins.push(Builtin {
            name: name.to_string(),
            factory: Arc::new(factory),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn builtin_names(&self) -> impl Iterator<Item = &str> {
        self.builtins.iter().map(|b| b.name.as_str())
    }

    /// Run a builtin's factory and keep the source it produced.
    pub fn call_builtin(&self, builtin: &str, args: BuiltinArgs) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::Frozen(self.name.clone()));
        }
        let factory = self
            .builtins
            .iter()
            .find(|b| b.name == builtin)
            .map(|b| Arc::clone(&b.factory))
            .ok_or_else(|| Error::invalid_arguments(builtin, "no such builtin"))?;
        let source = factory(args)?;
        debug!(
            plugin = %self.name,
            source = source.name(),
            project = source.project(),
            "source registered"
        );
        self.add_source(source)
    }

    pub fn add_source(&self, source: Arc<dyn Source>) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::Frozen(self.name.clone()));
        }
        self.sources
            .lock()
            .expect("plugin sources mutex poisoned")
            .push(source);
        Ok(())
    }

    /// Sources in creation order.
    pub fn sources(&self) -> Vec<Arc<dyn Source>> {
        self.sources
            .lock()
            .expect("plugin sources mutex poisoned")
            .clone()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }
}

/// Registered plugins, in registration order.
#[derive(Default)]
pub struct Registry {
    plugins: Vec<Arc<Plugin>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Plugin) -> Result<()> {
        if self.plugins.iter().any(|p| p.name == plugin.name) {
            return Err(Error::DuplicatePlugin(plugin.name));
        }
        for name in plugin.builtin_names() {
            if let Some(owner) = self
                .plugins
                .iter()
                .find(|p| p.builtin_names().any(|b| b == name))
            {
                return Err(Error::DuplicateBuiltin {
                    name: name.to_string(),
                    first: owner.name.clone(),
                    second: plugin.name.clone(),
                });
            }
        }
        info!(plugin = %plugin.name, "plugin registered");
        self.plugins.push(Arc::new(plugin));
        Ok(())
    }

    pub fn plugins(&self) -> &[Arc<Plugin>] {
        &self.plugins
    }

    /// Every source, plugin by plugin.
    pub fn sources(&self) -> Vec<Arc<dyn Source>> {
        self.plugins.iter().flat_map(|p| p.sources()).collect()
    }

    /// No source may be added after this.
    pub fn freeze(&self) {
        for plugin in &self.plugins {
            plugin.freeze();
        }
    }

    pub fn is_frozen(&self) -> bool {
        !self.plugins.is_empty() && self.plugins.iter().all(|p| p.is_frozen())
    }
}

/// Arguments of one builtin call: query parameters plus the transform callables.
#[derive(Debug, Clone)]
pub struct BuiltinArgs {
    builtin: String,
    params: Map<String, Value>,
    pub transforms: Transforms,
}

impl BuiltinArgs {
    pub fn new(builtin: &str, params: Map<String, Value>, transforms: Transforms) -> Self {
        Self {
            builtin: builtin.to_string(),
            params,
            transforms,
        }
    }

    pub fn builtin(&self) -> &str {
        &self.builtin
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn invalid(&self, reason: String) -> Error {
        Error::invalid_arguments(&self.builtin, reason)
    }

    /// Reject keys the backend does not understand.
    pub fn expect_only(&self, known: &[&str]) -> Result<()> {
        let unknown: Vec<&str> = self
            .params
            .keys()
            .map(String::as_str)
            .filter(|k| !known.contains(k))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(self.invalid(format!("unknown key(s): {}", unknown.join(", "))))
        }
    }

    pub fn required_str(&self, key: &str) -> Result<String> {
        self.optional_str(key)?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.invalid(format!("`{key}` is required")))
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<String>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.invalid(format!("`{key}` must be a string, got {other}"))),
        }
    }

    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("`{key}` must be a non-negative integer, got {v}"))),
        }
    }

    /// Result cap: absent, zero or negative values mean `default`.
    pub fn limit_or(&self, key: &str, default: u64) -> Result<u64> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) if v.as_i64().is_some_and(|n| n <= 0) => Ok(default),
            Some(v) => v
                .as_u64()
                .ok_or_else(|| self.invalid(format!("`{key}` must be an integer, got {v}"))),
        }
    }

    pub fn optional_str_list(&self, key: &str) -> Result<Vec<String>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(format!("`{key}` must hold strings, got {item}")))
                })
                .collect(),
            Some(other) => Err(self.invalid(format!("`{key}` must be a list of strings, got {other}"))),
        }
    }
}
