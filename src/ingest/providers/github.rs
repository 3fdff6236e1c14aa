// src/ingest/providers/github.rs
use super::{env_credential, excerpt, http_client};
use crate::error::{Error, Result};
use crate::ingest::scripted::ScriptedSource;
use crate::ingest::types::{BackendClient, FetchContext, RawItem, Source};
use crate::registry::{BuiltinArgs, Plugin};
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub const PLUGIN_NAME: &str = "github";
pub const SOURCE_NAME: &str = "GitHub";
pub const DEFAULT_HOST: &str = "github.com";
const DEFAULT_LIMIT: u64 = 100;
const MAX_PAGE_SIZE: u64 = 100;
/// The search API serves at most this many results per query.
const SEARCH_RESULT_CAP: u64 = 1000;

const KNOWN_KEYS: &[&str] = &[
    "host",
    "repo",
    "state",
    "assignee",
    "creator",
    "mentioned",
    "labels",
    "sort",
    "direction",
    "limit",
];
const SORT_FIELDS: &[&str] = &[
    "comments",
    "reactions",
    "reactions-+1",
    "reactions--1",
    "interactions",
    "created",
    "updated",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GithubSettings {
    /// Environment variable holding the API token (optional).
    pub token_env: String,
    pub timeout_secs: u64,
    /// Overrides the API base derived from `host`.
    pub api_url: Option<String>,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            token_env: "GITHUB_TOKEN".into(),
            timeout_secs: 20,
            api_url: None,
        }
    }
}

/// Issue search for one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct GithubQuery {
    pub repo: String,
    pub state: Option<String>,
    pub assignee: Option<String>,
    pub creator: Option<String>,
    pub mentioned: Option<String>,
    pub labels: Vec<String>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    pub limit: u64,
}

impl GithubQuery {
    pub fn from_args(args: &BuiltinArgs) -> Result<Self> {
        let invalid = |reason: String| Error::invalid_arguments(args.builtin(), reason);

        let repo = args.required_str("repo")?;
        if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
            return Err(invalid(format!("`repo` must look like owner/name, got {repo:?}")));
        }
        let state = args.optional_str("state")?;
        if let Some(s) = state.as_deref() {
            if !matches!(s, "open" | "closed") {
                return Err(invalid(format!("`state` must be open or closed, got {s:?}")));
            }
        }
        let sort = args.optional_str("sort")?;
        if let Some(s) = sort.as_deref() {
            if !SORT_FIELDS.contains(&s) {
                return Err(invalid(format!("`sort` must be one of {}", SORT_FIELDS.join(", "))));
            }
        }
        let direction = args.optional_str("direction")?;
        if let Some(d) = direction.as_deref() {
            if !matches!(d, "asc" | "desc") {
                return Err(invalid(format!("`direction` must be asc or desc, got {d:?}")));
            }
        }

        Ok(Self {
            repo,
            state,
            assignee: args.optional_str("assignee")?,
            creator: args.optional_str("creator")?,
            mentioned: args.optional_str("mentioned")?,
            labels: args.optional_str_list("labels")?,
            sort,
            direction,
            limit: args.limit_or("limit", DEFAULT_LIMIT)?.min(SEARCH_RESULT_CAP),
        })
    }

    /// The `q` parameter of the search endpoint.
    pub fn search_terms(&self) -> String {
        let mut terms = vec![format!("repo:{}", self.repo)];
        if let Some(state) = &self.state {
            terms.push(format!("state:{state}"));
        }
        if let Some(assignee) = &self.assignee {
            terms.push(format!("assignee:{assignee}"));
        }
        if let Some(creator) = &self.creator {
            terms.push(format!("author:{creator}"));
        }
        if let Some(mentioned) = &self.mentioned {
            terms.push(format!("mentions:{mentioned}"));
        }
        for label in &self.labels {
            terms.push(format!("label:\"{label}\""));
        }
        terms.join(" ")
    }
}

/// `https://api.github.com` for github.com, `https://<host>/api/v3` for Enterprise.
pub fn api_base_for(host: &str) -> String {
    let host = host
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    if host.is_empty() || host.eq_ignore_ascii_case(DEFAULT_HOST) {
        "https://api.github.com".to_string()
    } else {
        format!("https://{host}/api/v3")
    }
}

pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(host: &str, settings: &GithubSettings) -> anyhow::Result<Self> {
        let api_base = settings
            .api_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| api_base_for(host));
        Ok(Self {
            http: http_client(settings.timeout_secs)?,
            api_base,
            token: env_credential(&settings.token_env),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn search_page(
        &self,
        query: &GithubQuery,
        terms: &str,
        per_page: u64,
        page: u64,
    ) -> anyhow::Result<SearchPage> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", terms.to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.clone()));
        }
        if let Some(direction) = &query.direction {
            params.push(("order", direction.clone()));
        }

        let mut req = self
            .http
            .get(format!("{}/search/issues", self.api_base))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .query(&params);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("GitHub search page {page}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GitHub search returned {status}: {}", excerpt(&body, 200));
        }
        resp.json::<SearchPage>()
            .await
            .context("decoding GitHub search response")
    }
}

#[async_trait]
impl BackendClient for GithubClient {
    type Query = GithubQuery;

    async fn fetch_raw_items(
        &self,
        ctx: &FetchContext,
        query: &GithubQuery,
    ) -> anyhow::Result<Vec<RawItem>> {
        let terms = query.search_terms();
        // page offsets depend on a fixed page size
        let per_page = query.limit.clamp(1, MAX_PAGE_SIZE);
        let mut items = Vec::new();
        let mut page = 1u64;

        while (items.len() as u64) < query.limit {
            if ctx.is_cancelled() {
                bail!("cancelled before page {page}");
            }
            let body = self.search_page(query, &terms, per_page, page).await?;
            let received = body.items.len() as u64;
            items.extend(body.items.into_iter().map(SearchItem::into_raw));
            debug!(repo = %query.repo, page, received, total = body.total_count, "github page");
            if received < per_page || items.len() as u64 >= body.total_count {
                break;
            }
            page += 1;
        }

        items.truncate(query.limit as usize);
        Ok(items)
    }
}

/// The `github` plugin: `github(#{ repo: "owner/name", ... })`.
pub fn plugin(settings: GithubSettings) -> Plugin {
    Plugin::new(PLUGIN_NAME).with_builtin(PLUGIN_NAME, move |args: BuiltinArgs| {
        args.expect_only(KNOWN_KEYS)?;
        let host = args
            .optional_str("host")?
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let query = GithubQuery::from_args(&args)?;
        let client = GithubClient::new(&host, &settings)
            .map_err(|e| Error::invalid_arguments(PLUGIN_NAME, format!("{e:#}")))?;
        let project = query.repo.clone();
        Ok(Arc::new(ScriptedSource::new(
            SOURCE_NAME,
            project,
            client,
            query,
            args.transforms,
        )) as Arc<dyn Source>)
    })
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    total_count: u64,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: u64,
    number: u64,
    html_url: String,
    title: String,
    body: Option<String>,
    state: String,
    state_reason: Option<String>,
    user: Option<Login>,
    author_association: Option<String>,
    #[serde(default)]
    assignees: Vec<Login>,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    comments: u64,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    draft: bool,
    pull_request: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl SearchItem {
    fn into_raw(self) -> RawItem {
        let kind = if self.pull_request.is_some() {
            "PullRequest"
        } else {
            "Issue"
        };
        RawItem::new(self.id.to_string())
            .with_field("number", self.number)
            .with_field("url", self.html_url)
            .with_field("kind", kind)
            .with_field("title", self.title)
            .with_field("body", self.body.unwrap_or_default())
            .with_field("state", self.state)
            .with_field("state_reason", json!(self.state_reason))
            .with_field("author", self.user.map(|u| u.login).unwrap_or_default())
            .with_field("author_association", json!(self.author_association))
            .with_field(
                "assignees",
                self.assignees.into_iter().map(|a| a.login).collect::<Vec<_>>(),
            )
            .with_field(
                "labels",
                self.labels.into_iter().map(|l| l.name).collect::<Vec<_>>(),
            )
            .with_field("comments", self.comments)
            .with_field("locked", self.locked)
            .with_field("draft", self.draft)
            .with_field("created", self.created_at.to_rfc3339())
            .with_field("updated", self.updated_at.to_rfc3339())
            .with_field("closed", json!(self.closed_at.map(|t| t.to_rfc3339())))
    }
}
