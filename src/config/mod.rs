// src/config/mod.rs
//! TOML settings. Every field is optional; a missing file means defaults.

use crate::engine::EngineSettings;
use crate::ingest::providers::github::GithubSettings;
use crate::ingest::providers::jira::JiraSettings;
use crate::script::{RuntimeLimits, DEFAULT_MAX_OPERATIONS};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_SETTINGS_PATH: &str = "WORKLENS_SETTINGS_PATH";
pub const DEFAULT_SETTINGS_PATH: &str = "config/worklens.toml";
pub const DEFAULT_LOG_FILTER: &str = "worklens=info,warn";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub script: ScriptSettings,
    pub github: GithubSettings,
    pub jira: JiraSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Evaluation budget per script call; 0 disables it.
    pub max_operations: u64,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }
}

impl ScriptSettings {
    pub fn limits(&self) -> RuntimeLimits {
        RuntimeLimits {
            max_operations: self.max_operations,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Load settings from an explicit TOML file.
pub fn load_from(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing settings in {}", path.display()))
}

/// Load settings using env var + fallbacks:
/// 1) $WORKLENS_SETTINGS_PATH
/// 2) config/worklens.toml
/// 3) defaults
pub fn load_default() -> Result<Settings> {
    if let Ok(p) = std::env::var(ENV_SETTINGS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!(
            "{ENV_SETTINGS_PATH} points to non-existent path {}",
            pb.display()
        ));
    }
    let default_p = PathBuf::from(DEFAULT_SETTINGS_PATH);
    if default_p.exists() {
        return load_from(&default_p);
    }
    Ok(Settings::default())
}

/// An explicit path wins over every fallback.
pub fn load(explicit: Option<&Path>) -> Result<Settings> {
    match explicit {
        Some(path) => load_from(path),
        None => load_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MergePolicy;
    use std::{env, fs};

    #[test]
    fn empty_file_means_defaults() {
        let s: Settings = toml::from_str("").unwrap();
        assert_eq!(s.engine.max_concurrent_fetches, 8);
        assert_eq!(s.engine.merge_policy, MergePolicy::FirstSeen);
        assert_eq!(s.script.max_operations, DEFAULT_MAX_OPERATIONS);
        assert_eq!(s.github.token_env, "GITHUB_TOKEN");
        assert_eq!(s.jira.user_env, "JIRA_USER");
        assert_eq!(s.logging.format, LogFormat::Compact);
        assert_eq!(s.logging.filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn every_section_is_read() {
        let s: Settings = toml::from_str(
            r#"
            [engine]
            max_concurrent_fetches = 0
            merge_policy = "highest_priority"

            [script]
            max_operations = 5000

            [github]
            token_env = "GH_PAT"
            timeout_secs = 5
            api_url = "http://localhost:9000"

            [jira]
            token_env = "ATLASSIAN_TOKEN"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(s.engine.max_concurrent_fetches, 0);
        assert_eq!(s.engine.merge_policy, MergePolicy::HighestPriority);
        assert_eq!(s.script.limits().max_operations, 5000);
        assert_eq!(s.github.token_env, "GH_PAT");
        assert_eq!(s.github.api_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(s.jira.token_env, "ATLASSIAN_TOKEN");
        assert_eq!(s.jira.user_env, "JIRA_USER");
        assert_eq!(s.logging.format, LogFormat::Json);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(toml::from_str::<Settings>("[logging]\nformat = \"xml\"").is_err());
        assert!(toml::from_str::<Settings>("[engine]\nmerge_policy = \"newest\"").is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_SETTINGS_PATH);

        // nothing on disk
        let s = load_default().unwrap();
        assert_eq!(s.engine.max_concurrent_fetches, 8);

        // config/worklens.toml
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(
            tmp.path().join(DEFAULT_SETTINGS_PATH),
            "[engine]\nmax_concurrent_fetches = 2\n",
        )
        .unwrap();
        assert_eq!(load_default().unwrap().engine.max_concurrent_fetches, 2);

        // env wins
        let p = tmp.path().join("other.toml");
        fs::write(&p, "[engine]\nmax_concurrent_fetches = 3\n").unwrap();
        env::set_var(ENV_SETTINGS_PATH, p.display().to_string());
        assert_eq!(load_default().unwrap().engine.max_concurrent_fetches, 3);

        // explicit path wins over env
        let q = tmp.path().join("explicit.toml");
        fs::write(&q, "[engine]\nmax_concurrent_fetches = 4\n").unwrap();
        assert_eq!(load(Some(&q)).unwrap().engine.max_concurrent_fetches, 4);

        // env pointing nowhere is an error
        env::set_var(ENV_SETTINGS_PATH, tmp.path().join("missing.toml"));
        assert!(load_default().is_err());

        env::remove_var(ENV_SETTINGS_PATH);
        env::set_current_dir(&old).unwrap();
    }
}
