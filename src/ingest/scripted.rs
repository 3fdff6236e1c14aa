// src/ingest/scripted.rs
use crate::error::{Error, Result};
use crate::ingest::pipeline::Transforms;
use crate::ingest::types::{BackendClient, FetchContext, Source, SourceResult};
use crate::script::RuntimeHandle;
use async_trait::async_trait;
use metrics::counter;
use tracing::debug;

/// A backend query bound to its transform callables.
///
/// Every backend plugin builds its sources as `ScriptedSource`s; only the
/// client and the query type differ.
pub struct ScriptedSource<B: BackendClient> {
    name: String,
    project: String,
    client: B,
    query: B::Query,
    transforms: Transforms,
}

impl<B: BackendClient> ScriptedSource<B> {
    pub fn new(
        name: impl Into<String>,
        project: impl Into<String>,
        client: B,
        query: B::Query,
        transforms: Transforms,
    ) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            client,
            query,
            transforms,
        }
    }

    pub fn query(&self) -> &B::Query {
        &self.query
    }

    pub fn transforms(&self) -> &Transforms {
        &self.transforms
    }

    fn backend_error(&self, err: anyhow::Error) -> Error {
        Error::Backend {
            source_name: self.name.clone(),
            project: self.project.clone(),
            message: format!("{err:#}"),
        }
    }
}

#[async_trait]
impl<B: BackendClient> Source for ScriptedSource<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn project(&self) -> &str {
        &self.project
    }

    async fn fetch(&self, ctx: &FetchContext, runtime: &RuntimeHandle) -> Result<SourceResult> {
        let raw = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            fetched = self.client.fetch_raw_items(ctx, &self.query) => {
                fetched.map_err(|e| self.backend_error(e))?
            }
        };

        let fetched = raw.len();
        let mut items = Vec::with_capacity(fetched);
        for item in raw {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(entry) = self.transforms.apply(runtime, item.into_entry()).await? {
                items.push(entry);
            }
        }

        let kept = items.len();
        counter!("entries_kept_total").increment(kept as u64);
        counter!("entries_filtered_total").increment((fetched - kept) as u64);
        debug!(
            source = %self.name,
            project = %self.project,
            fetched,
            kept,
            "source fetched"
        );
        Ok(SourceResult::new(self.name.clone(), self.project.clone(), items))
    }
}
