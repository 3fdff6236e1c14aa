// src/present/json.rs
use super::Presenter;
use crate::ingest::types::SourceResult;
use anyhow::Context;

/// One JSON object per result per line: `{"source", "project", "items"}`.
pub struct JsonLines;

impl Presenter for JsonLines {
    fn render(&self, results: &[SourceResult]) -> anyhow::Result<String> {
        let mut out = String::new();
        for result in results {
            let line = serde_json::to_string(result)
                .with_context(|| format!("serializing {}/{}", result.source, result.project))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}
