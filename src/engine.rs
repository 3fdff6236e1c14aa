//! # Aggregation Engine
//! Fetches every registered source concurrently and merges the results by
//! (source, project), deduplicating entries by id.
//!
//! Fetch I/O runs in parallel tasks; script evaluation is serialized by the
//! script runtime queue. Merging happens on the calling task only, so the
//! accumulator needs no lock. A failing source never stops the others; a
//! cancelled context stops all of them.

use crate::error::{Error, Result, SourceFailure};
use crate::ingest::types::{FetchContext, Source, SourceResult};
use crate::ingest::{ensure_metrics_described, MergePolicy, ResultSet};
use crate::registry::Registry;
use crate::script::RuntimeHandle;
use metrics::{counter, histogram};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Upper bound on in-flight fetches; 0 means unlimited.
    pub max_concurrent_fetches: usize,
    pub merge_policy: MergePolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            merge_policy: MergePolicy::default(),
        }
    }
}

/// Outcome of a completed run: merged results plus every source failure.
#[derive(Debug)]
pub struct RunReport {
    pub results: Vec<SourceResult>,
    pub failures: Vec<SourceFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Results and the joined error (`Error::Sources`), if any source failed.
    pub fn into_parts(self) -> (Vec<SourceResult>, Option<Error>) {
        let err = (!self.failures.is_empty()).then(|| Error::Sources(self.failures));
        (self.results, err)
    }
}

pub struct Engine {
    registry: Arc<Registry>,
    runtime: RuntimeHandle,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, runtime: RuntimeHandle, settings: EngineSettings) -> Self {
        Self {
            registry,
            runtime,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Fetch every source once and merge the results.
    ///
    /// Returns `Err(Error::Cancelled)` if `ctx` is cancelled before all fetches
    /// finished; results gathered up to that point are discarded.
    pub async fn run(&self, ctx: &FetchContext) -> Result<RunReport> {
        ensure_metrics_described();
        let sources = self.registry.sources();
        let started = Instant::now();

        let limiter = (self.settings.max_concurrent_fetches > 0)
            .then(|| Arc::new(Semaphore::new(self.settings.max_concurrent_fetches)));

        let mut tasks = JoinSet::new();
        for (rank, source) in sources.iter().enumerate() {
            let source = Arc::clone(source);
            let ctx = ctx.clone();
            let runtime = self.runtime.clone();
            let limiter = limiter.clone();
            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                (rank, fetch_one(source.as_ref(), &ctx, &runtime).await)
            });
        }

        let mut merged = ResultSet::new(self.settings.merge_policy);
        let mut failures: Vec<(usize, SourceFailure)> = Vec::new();
        let mut pending = vec![true; sources.len()];

        loop {
            let joined = tokio::select! {
                biased;
                _ = ctx.cancelled() => None,
                joined = tasks.join_next() => Some(joined),
            };
            let joined = match joined {
                None => return Err(cancel(&mut tasks)),
                Some(None) => break,
                Some(Some(joined)) => joined,
            };

            let (rank, outcome) = match joined {
                Ok(done) => done,
                Err(err) => {
                    // rank is unknown here; the pending scan below reports it
                    warn!(error = %err, "fetch task did not complete");
                    continue;
                }
            };
            pending[rank] = false;

            match outcome {
                Ok(result) => {
                    let dropped = merged.merge(rank, result);
                    counter!("entries_deduplicated_total").increment(dropped as u64);
                }
                Err(Error::Cancelled) => return Err(cancel(&mut tasks)),
                Err(error) => {
                    failures.push((rank, failure(sources[rank].as_ref(), error)));
                }
            }
        }

        for (rank, _) in pending.iter().enumerate().filter(|(_, p)| **p) {
            let source = sources[rank].as_ref();
            counter!("fetch_source_errors_total").increment(1);
            let aborted = Error::TaskAborted {
                source_name: source.name().to_string(),
                project: source.project().to_string(),
            };
            failures.push((rank, failure(source, aborted)));
        }
        failures.sort_by_key(|(rank, _)| *rank);

        let results = merged.into_results();
        info!(
            sources = sources.len(),
            results = results.len(),
            failures = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(RunReport {
            results,
            failures: failures.into_iter().map(|(_, f)| f).collect(),
        })
    }
}

async fn fetch_one(
    source: &dyn Source,
    ctx: &FetchContext,
    runtime: &RuntimeHandle,
) -> Result<SourceResult> {
    let t0 = Instant::now();
    counter!("fetch_sources_total").increment(1);
    let outcome = source.fetch(ctx, runtime).await;
    histogram!("fetch_source_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    match &outcome {
        Ok(_) | Err(Error::Cancelled) => {}
        Err(error) => {
            counter!("fetch_source_errors_total").increment(1);
            warn!(
                source = source.name(),
                project = source.project(),
                %error,
                "source fetch failed"
            );
        }
    }
    outcome
}

fn failure(source: &dyn Source, error: Error) -> SourceFailure {
    SourceFailure {
        source_name: source.name().to_string(),
        project: source.project().to_string(),
        error,
    }
}

fn cancel<T: 'static>(tasks: &mut JoinSet<T>) -> Error {
    tasks.abort_all();
    warn!(outstanding = tasks.len(), "run cancelled");
    Error::Cancelled
}
