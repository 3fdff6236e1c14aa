// src/ingest/pipeline.rs
//! Per-entry transform pipeline: filters, then priorities, then status.

use crate::error::{CallableRole, Error, Result};
use crate::ingest::types::Entry;
use crate::script::{Callable, RuntimeHandle, ScriptValue};

/// Script callables bound to one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transforms {
    /// Predicates; all must hold for an entry to be kept.
    pub filters: Vec<Callable>,
    /// Integer scores, summed into `Entry::priority`.
    pub priorities: Vec<Callable>,
    /// Status label generator.
    pub status: Option<Callable>,
}

impl Transforms {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.priorities.is_empty() && self.status.is_none()
    }

    /// Run the pipeline on one entry. `Ok(None)` means a filter dropped it.
    ///
    /// Filters short-circuit on the first `false`. Priority starts at 0 and
    /// saturates instead of overflowing.
    pub async fn apply(&self, runtime: &RuntimeHandle, mut entry: Entry) -> Result<Option<Entry>> {
        for filter in &self.filters {
            match runtime.invoke(CallableRole::Filter, filter, &entry).await? {
                ScriptValue::Bool(true) => {}
                ScriptValue::Bool(false) => return Ok(None),
                other => return Err(type_error(CallableRole::Filter, filter, "a bool", &other)),
            }
        }

        let mut priority: i64 = 0;
        for scorer in &self.priorities {
            match runtime.invoke(CallableRole::Priority, scorer, &entry).await? {
                ScriptValue::Int(score) => priority = priority.saturating_add(score),
                other => {
                    return Err(type_error(CallableRole::Priority, scorer, "an integer", &other))
                }
            }
        }
        entry.priority = priority;

        if let Some(status) = &self.status {
            match runtime.invoke(CallableRole::Status, status, &entry).await? {
                ScriptValue::Str(label) => entry.status = label,
                other => return Err(type_error(CallableRole::Status, status, "a string", &other)),
            }
        }

        Ok(Some(entry))
    }
}

fn type_error(role: CallableRole, callable: &Callable, expected: &str, got: &ScriptValue) -> Error {
    Error::Callable {
        role,
        name: callable.name().to_string(),
        message: format!("expected {expected}, got {} ({got})", got.type_name()),
    }
}
