// src/present/mod.rs
//! Rendering of merged results for stdout.

pub mod json;
pub mod markdown;

use crate::ingest::types::SourceResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

pub trait Presenter {
    fn render(&self, results: &[SourceResult]) -> anyhow::Result<String>;
}

pub fn presenter(format: OutputFormat) -> Box<dyn Presenter> {
    match format {
        OutputFormat::Markdown => Box::new(markdown::Markdown::default()),
        OutputFormat::Json => Box::new(json::JsonLines),
    }
}
