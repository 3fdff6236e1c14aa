// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use worklens::ingest::scripted::ScriptedSource;
use worklens::ingest::types::BackendClient;
use worklens::{
    BuiltinArgs, Engine, EngineSettings, Error, FetchContext, Plugin, RawItem, Registry,
    RuntimeLimits, ScriptRuntime, ScriptSource, Source,
};

/// Tracks how many fixture fetches run at once.
#[derive(Default)]
pub struct Concurrency {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
}

impl Concurrency {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> InFlight {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(Arc::clone(self))
    }
}

struct InFlight(Arc<Concurrency>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct FixtureQuery {
    entries: Vec<RawItem>,
    delay_ms: u64,
    fail: Option<String>,
    panic: bool,
    hang: bool,
}

/// Backend serving canned entries, with optional delay, failure, panic or hang.
pub struct FixtureBackend {
    tracker: Arc<Concurrency>,
}

#[async_trait]
impl BackendClient for FixtureBackend {
    type Query = FixtureQuery;

    async fn fetch_raw_items(
        &self,
        _ctx: &FetchContext,
        query: &FixtureQuery,
    ) -> anyhow::Result<Vec<RawItem>> {
        let _guard = self.tracker.enter();
        if query.hang {
            std::future::pending::<()>().await;
        }
        if query.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(query.delay_ms)).await;
        }
        if query.panic {
            panic!("fixture backend panicked");
        }
        if let Some(msg) = &query.fail {
            bail!("{msg}");
        }
        Ok(query.entries.clone())
    }
}

fn raw_items(args: &BuiltinArgs) -> worklens::Result<Vec<RawItem>> {
    let Some(entries) = args.params().get("entries") else {
        return Ok(Vec::new());
    };
    let Value::Array(entries) = entries else {
        return Err(Error::invalid_arguments(args.builtin(), "`entries` must be an array"));
    };
    entries
        .iter()
        .map(|e| {
            let Value::Object(fields) = e else {
                return Err(Error::invalid_arguments(args.builtin(), "entry must be a map"));
            };
            let id = match fields.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(Error::invalid_arguments(args.builtin(), "entry needs an id")),
            };
            let mut item = RawItem::new(id);
            for (k, v) in fields.iter().filter(|(k, _)| k.as_str() != "id") {
                item = item.with_field(k, v.clone());
            }
            Ok(item)
        })
        .collect()
}

/// `fixture(#{ name, project, entries, delay_ms, fail, panic, hang, filters, priorities, status })`
pub fn fixture_plugin(tracker: Arc<Concurrency>) -> Plugin {
    Plugin::new("fixture").with_builtin("fixture", move |args: BuiltinArgs| {
        args.expect_only(&["name", "project", "entries", "delay_ms", "fail", "panic", "hang"])?;
        let name = args.optional_str("name")?.unwrap_or_else(|| "GitHub".into());
        let project = args.required_str("project")?;
        let flag = |key: &str| args.params().get(key).and_then(Value::as_bool).unwrap_or(false);
        let query = FixtureQuery {
            entries: raw_items(&args)?,
            delay_ms: args.optional_u64("delay_ms")?.unwrap_or(0),
            fail: args.optional_str("fail")?,
            panic: flag("panic"),
            hang: flag("hang"),
        };
        let backend = FixtureBackend {
            tracker: Arc::clone(&tracker),
        };
        Ok(Arc::new(ScriptedSource::new(
            name,
            project,
            backend,
            query,
            args.transforms,
        )) as Arc<dyn Source>)
    })
}

pub struct Harness {
    pub registry: Arc<Registry>,
    pub runtime: ScriptRuntime,
    pub tracker: Arc<Concurrency>,
}

impl Harness {
    pub fn engine(&self, settings: EngineSettings) -> Engine {
        Engine::new(Arc::clone(&self.registry), self.runtime.handle(), settings)
    }
}

/// Register the fixture plugin and run `script` against it.
pub async fn load(script: &str) -> worklens::Result<Harness> {
    let tracker = Arc::new(Concurrency::default());
    let mut registry = Registry::new();
    registry.register(fixture_plugin(Arc::clone(&tracker)))?;
    let registry = Arc::new(registry);
    let runtime = ScriptRuntime::load(
        Arc::clone(&registry),
        ScriptSource::inline("fixture.rhai", script),
        RuntimeLimits::default(),
    )
    .await?;
    Ok(Harness {
        registry,
        runtime,
        tracker,
    })
}

pub fn ids(result: &worklens::SourceResult) -> Vec<String> {
    result.items.iter().map(|e| e.identifier.clone()).collect()
}
