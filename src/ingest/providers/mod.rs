// src/ingest/providers/mod.rs
pub mod github;
pub mod jira;

use anyhow::{Context, Result};
use std::time::Duration;

const USER_AGENT: &str = concat!("worklens/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client setup for tracker backends.
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(timeout_secs.clamp(1, 10)))
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .context("building HTTP client")
}

/// Read a credential from the environment; empty counts as unset.
pub(crate) fn env_credential(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First `max` chars of an error body, for log and error messages.
pub(crate) fn excerpt(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    }
}
