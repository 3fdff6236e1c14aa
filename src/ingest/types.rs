// src/ingest/types.rs
use crate::error::Result;
use crate::script::RuntimeHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

/// Keys the engine owns in an entry's key-value view.
pub const ID_KEY: &str = "id";
pub const PRIORITY_KEY: &str = "priority";
pub const STATUS_KEY: &str = "status";

/// One fetched work item (issue, pull request, ticket).
///
/// `identifier` is stable within its (source, project); `priority` and `status`
/// are filled in by the transform pipeline. Everything the backend knows about
/// the item lives in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "id")]
    pub identifier: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entry {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            priority: 0,
            status: String::new(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set_field(key, value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Engine-owned keys are not stored as backend fields.
    pub fn set_field(&mut self, key: &str, value: impl Into<Value>) {
        if matches!(key, ID_KEY | PRIORITY_KEY | STATUS_KEY) {
            return;
        }
        self.fields.insert(key.to_string(), value.into());
    }

    /// Status for display: empty means nobody derived one.
    pub fn status_label(&self) -> &str {
        if self.status.is_empty() {
            "Unknown"
        } else {
            &self.status
        }
    }

    /// Flat key-value view handed to script callables.
    pub fn script_view(&self) -> Value {
        let mut view = self.fields.clone();
        view.insert(ID_KEY.into(), Value::from(self.identifier.clone()));
        view.insert(PRIORITY_KEY.into(), Value::from(self.priority));
        view.insert(STATUS_KEY.into(), Value::from(self.status.clone()));
        Value::Object(view)
    }
}

/// An item as a backend client returns it, before any transform ran.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub identifier: String,
    pub fields: Map<String, Value>,
}

impl RawItem {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn into_entry(self) -> Entry {
        let mut entry = Entry::new(self.identifier);
        for (key, value) in self.fields {
            entry.set_field(&key, value);
        }
        entry
    }
}

/// (source name, project) grouping key for results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub source: String,
    pub project: String,
}

impl SourceKey {
    pub fn new(source: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            project: project.into(),
        }
    }

    pub fn of(source: &dyn Source) -> Self {
        Self::new(source.name(), source.project())
    }
}

/// Output of one source's fetch, or of several merged ones sharing a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source: String,
    pub project: String,
    pub items: Vec<Entry>,
}

impl SourceResult {
    pub fn new(source: impl Into<String>, project: impl Into<String>, items: Vec<Entry>) -> Self {
        Self {
            source: source.into(),
            project: project.into(),
            items,
        }
    }

    pub fn key(&self) -> SourceKey {
        SourceKey::new(self.source.clone(), self.project.clone())
    }
}

/// Cancellation signal observed by every fetch path of a run.
#[derive(Debug, Clone)]
pub struct FetchContext {
    cancel: watch::Receiver<bool>,
}

/// Fires the signal of the `FetchContext` it was created with.
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl Canceller {
    pub fn cancel(&self) {
        // send_replace never fails, even with every receiver gone
        self.tx.send_replace(true);
    }
}

impl FetchContext {
    pub fn new() -> (Self, Canceller) {
        let (tx, rx) = watch::channel(false);
        (
            Self { cancel: rx },
            Canceller {
                tx: std::sync::Arc::new(tx),
            },
        )
    }

    /// A context nobody can cancel.
    pub fn background() -> Self {
        Self::new().0
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancelled; never resolves for a background context.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// A configured, ready-to-fetch binding to one backend project.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Stable backend label, e.g. "GitHub".
    fn name(&self) -> &str;

    fn project(&self) -> &str;

    /// Fetch, filter, score and status every item of the project.
    async fn fetch(&self, ctx: &FetchContext, runtime: &RuntimeHandle) -> Result<SourceResult>;
}

/// Transport to one tracker. Query shape is backend-specific.
#[async_trait::async_trait]
pub trait BackendClient: Send + Sync {
    type Query: Send + Sync;

    async fn fetch_raw_items(
        &self,
        ctx: &FetchContext,
        query: &Self::Query,
    ) -> anyhow::Result<Vec<RawItem>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_exposes_engine_keys_next_to_fields() {
        let mut entry = Entry::new("42")
            .with_field("title", "Crash on start")
            .with_field("labels", vec!["bug", "p1"]);
        entry.priority = 7;

        let view = entry.script_view();
        assert_eq!(view["id"], "42");
        assert_eq!(view["priority"], 7);
        assert_eq!(view["status"], "");
        assert_eq!(view["title"], "Crash on start");
        assert_eq!(view["labels"][1], "p1");
    }

    #[test]
    fn engine_keys_cannot_be_shadowed_by_fields() {
        let entry = RawItem::new("1")
            .with_field("priority", 99)
            .with_field("status", "Done")
            .with_field("state", "open")
            .into_entry();
        assert_eq!(entry.priority, 0);
        assert_eq!(entry.status_label(), "Unknown");
        assert_eq!(entry.field_str("state"), Some("open"));
        assert!(entry.field("priority").is_none());
    }

    #[test]
    fn entry_serializes_flat() {
        let entry = Entry::new("7").with_field("title", "x");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"id": "7", "priority": 0, "status": "", "title": "x"}));
    }

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let (ctx, canceller) = FetchContext::new();
        assert!(!ctx.is_cancelled());
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };
        canceller.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert!(ctx.is_cancelled());
    }
}
