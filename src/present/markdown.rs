// src/present/markdown.rs
use super::Presenter;
use crate::ingest::types::{Entry, SourceResult};
use serde_json::Value;
use std::cmp::Reverse;
use std::fmt::Write;

/// Markdown report, highest priority first within each result.
pub struct Markdown {
    /// Body excerpt length in chars; 0 omits bodies.
    pub body_chars: usize,
}

impl Default for Markdown {
    fn default() -> Self {
        Self { body_chars: 280 }
    }
}

/// First present, non-empty string among `keys`.
fn first_str<'a>(entry: &'a Entry, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| entry.field_str(k))
        .find(|s| !s.trim().is_empty())
}

fn string_list(entry: &Entry, keys: &[&str]) -> Vec<String> {
    for key in keys {
        match entry.field(key) {
            Some(Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            }
            Some(Value::String(s)) if !s.is_empty() => return vec![s.clone()],
            _ => {}
        }
    }
    Vec::new()
}

impl Markdown {
    fn entry(&self, out: &mut String, entry: &Entry) -> std::fmt::Result {
        let kind = first_str(entry, &["kind", "issue_type"]).unwrap_or("Item");
        let state = first_str(entry, &["state", "ticket_status"]).unwrap_or("unknown");
        let title = first_str(entry, &["title", "summary", "key"]).unwrap_or(&entry.identifier);
        writeln!(out, "## [{kind}][{state}]: {title}")?;
        writeln!(
            out,
            "**Priority**: {} | **Status**: {}",
            entry.priority,
            entry.status_label()
        )?;
        if let Some(url) = first_str(entry, &["url"]) {
            writeln!(out, "**URL**: {url}")?;
        }
        if let Some(author) = first_str(entry, &["author", "reporter", "creator"]) {
            writeln!(out, "**Author**: *{author}*")?;
        }
        let assignees = string_list(entry, &["assignees", "assignee"]);
        if !assignees.is_empty() {
            writeln!(out, "**Assignees**: {}", assignees.join(", "))?;
        }
        let labels = string_list(entry, &["labels"]);
        if !labels.is_empty() {
            let tags: Vec<String> = labels.iter().map(|l| format!("`{l}`")).collect();
            writeln!(out, "\n{}", tags.join(" "))?;
        }
        if self.body_chars > 0 {
            if let Some(body) = first_str(entry, &["body", "description"]) {
                writeln!(out, "\n{}", excerpt(body, self.body_chars))?;
            }
        }
        writeln!(out)
    }
}

fn excerpt(body: &str, max: usize) -> String {
    let body = body.trim();
    if body.chars().count() <= max {
        body.to_string()
    } else {
        let cut: String = body.chars().take(max).collect();
        format!("{}…", cut.trim_end())
    }
}

impl Presenter for Markdown {
    fn render(&self, results: &[SourceResult]) -> anyhow::Result<String> {
        let mut out = String::new();
        for result in results {
            writeln!(out, "# {} {}\n", result.source, result.project)?;
            if result.items.is_empty() {
                writeln!(out, "_No entries._\n")?;
                continue;
            }
            let mut items: Vec<&Entry> = result.items.iter().collect();
            items.sort_by_key(|e| Reverse(e.priority));
            for entry in items {
                self.entry(&mut out, entry)?;
            }
        }
        Ok(out)
    }
}
