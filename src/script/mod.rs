// src/script/mod.rs
//! Configuration scripts.
//!
//! The script is Rhai. Each plugin builtin becomes a script function taking an
//! object map, e.g.
//!
//! ```text
//! github(#{
//!     repo: "org/repo",
//!     filters: [|e| e.state == "open"],
//!     priorities: [|e| if e.labels.contains("bug") { 2 } else { 0 }],
//!     status: |e| if e.assignee == () { "Triage" } else { "In progress" },
//! });
//! ```
//!
//! Rhai values are not `Send`, so the engine lives on one dedicated thread for
//! the whole program. Fetch tasks reach it through [`RuntimeHandle`]; calls are
//! served one at a time in arrival order.

mod convert;
mod runtime;

pub use runtime::{RuntimeHandle, ScriptRuntime};

use crate::error::{Error, Result};
use std::fmt;
use std::path::Path;

/// Default evaluation budget per script call (and for the initial load).
pub const DEFAULT_MAX_OPERATIONS: u64 = 1_000_000;

/// Index of a captured function value inside the runtime's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallableId(pub(crate) usize);

/// Handle to a script function captured while the script loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callable {
    id: CallableId,
    name: String,
}

impl Callable {
    pub(crate) fn new(id: CallableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> CallableId {
        self.id
    }

    /// Function name as the script runtime reports it (closures get a generated one).
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Script return value, detached from the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Anything else, by type name.
    Other(String),
}

impl ScriptValue {
    pub fn type_name(&self) -> &str {
        match self {
            ScriptValue::Unit => "()",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Float(_) => "float",
            ScriptValue::Str(_) => "string",
            ScriptValue::Other(name) => name,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Unit => f.write_str("()"),
            ScriptValue::Bool(b) => write!(f, "{b}"),
            ScriptValue::Int(i) => write!(f, "{i}"),
            ScriptValue::Float(x) => write!(f, "{x}"),
            ScriptValue::Str(s) => write!(f, "{s:?}"),
            ScriptValue::Other(name) => write!(f, "<{name}>"),
        }
    }
}

/// Script text plus where it came from, for error messages.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    pub origin: String,
    pub text: String,
}

impl ScriptSource {
    pub fn inline(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Script {
            origin: origin.clone(),
            message: format!("reading script: {e}"),
        })?;
        Ok(Self { origin, text })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    /// 0 disables the limit.
    pub max_operations: u64,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }
}
