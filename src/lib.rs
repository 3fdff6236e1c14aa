// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod present;
pub mod registry;
pub mod script;

// ---- Re-exports for stable public API ----
pub use crate::engine::{Engine, EngineSettings, RunReport};
pub use crate::error::{CallableRole, Error, Result, SourceFailure};
pub use crate::ingest::types::{Canceller, Entry, FetchContext, RawItem, Source, SourceResult};
pub use crate::ingest::MergePolicy;
pub use crate::registry::{BuiltinArgs, Plugin, Registry};
pub use crate::script::{RuntimeHandle, RuntimeLimits, ScriptRuntime, ScriptSource};

use crate::ingest::providers::{github, jira};

/// Registry with every built-in tracker plugin (`github`, `jira`).
pub fn builtin_registry(settings: &config::Settings) -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register(github::plugin(settings.github.clone()))?;
    registry.register(jira::plugin(settings.jira.clone()))?;
    Ok(registry)
}
