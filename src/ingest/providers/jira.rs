// src/ingest/providers/jira.rs
use super::{env_credential, excerpt, http_client};
use crate::error::{Error, Result};
use crate::ingest::scripted::ScriptedSource;
use crate::ingest::types::{BackendClient, FetchContext, RawItem, Source};
use crate::registry::{BuiltinArgs, Plugin};
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub const PLUGIN_NAME: &str = "jira";
pub const SOURCE_NAME: &str = "Jira";
const DEFAULT_LIMIT: u64 = 100;
const MAX_PAGE_SIZE: u64 = 100;
const KNOWN_KEYS: &[&str] = &["host", "project", "jql", "limit"];
const FIELDS: &str = "summary,description,status,issuetype,priority,assignee,reporter,creator,\
labels,components,fixVersions,resolution,created,updated,duedate";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JiraSettings {
    /// Environment variable holding the account name for basic auth.
    pub user_env: String,
    /// Environment variable holding the API token (basic auth with a user, bearer without).
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for JiraSettings {
    fn default() -> Self {
        Self {
            user_env: "JIRA_USER".into(),
            token_env: "JIRA_TOKEN".into(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JiraQuery {
    pub host: String,
    pub project: String,
    pub jql: String,
    pub limit: u64,
}

impl JiraQuery {
    pub fn from_args(args: &BuiltinArgs) -> Result<Self> {
        let host = normalize_host(&args.required_str("host")?);
        let project = args.required_str("project")?;
        let jql = args
            .optional_str("jql")?
            .filter(|j| !j.trim().is_empty())
            .unwrap_or_else(|| default_jql(&project));
        Ok(Self {
            host,
            project,
            jql,
            limit: args.limit_or("limit", DEFAULT_LIMIT)?,
        })
    }

    pub fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.host)
    }
}

pub fn default_jql(project: &str) -> String {
    format!("project = \"{project}\" ORDER BY updated DESC")
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

enum Auth {
    None,
    Basic { user: String, token: String },
    Bearer(String),
}

pub struct JiraClient {
    http: reqwest::Client,
    auth: Auth,
}

impl JiraClient {
    pub fn new(settings: &JiraSettings) -> anyhow::Result<Self> {
        let auth = match (
            env_credential(&settings.user_env),
            env_credential(&settings.token_env),
        ) {
            (Some(user), Some(token)) => Auth::Basic { user, token },
            (None, Some(token)) => Auth::Bearer(token),
            _ => Auth::None,
        };
        Ok(Self {
            http: http_client(settings.timeout_secs)?,
            auth,
        })
    }

    async fn search_page(
        &self,
        query: &JiraQuery,
        start_at: u64,
        max_results: u64,
    ) -> anyhow::Result<SearchPage> {
        let start = start_at.to_string();
        let max = max_results.to_string();
        let mut req = self
            .http
            .get(format!("{}/rest/api/2/search", query.host))
            .header("Accept", "application/json")
            .query(&[
                ("jql", query.jql.as_str()),
                ("fields", FIELDS),
                ("startAt", start.as_str()),
                ("maxResults", max.as_str()),
            ]);
        req = match &self.auth {
            Auth::None => req,
            Auth::Basic { user, token } => req.basic_auth(user, Some(token)),
            Auth::Bearer(token) => req.bearer_auth(token),
        };

        let resp = req
            .send()
            .await
            .with_context(|| format!("Jira search at {start_at}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Jira search returned {status}: {}", excerpt(&body, 200));
        }
        resp.json::<SearchPage>()
            .await
            .context("decoding Jira search response")
    }
}

#[async_trait]
impl BackendClient for JiraClient {
    type Query = JiraQuery;

    async fn fetch_raw_items(
        &self,
        ctx: &FetchContext,
        query: &JiraQuery,
    ) -> anyhow::Result<Vec<RawItem>> {
        let mut items = Vec::new();
        while (items.len() as u64) < query.limit {
            if ctx.is_cancelled() {
                bail!("cancelled at offset {}", items.len());
            }
            let start_at = items.len() as u64;
            let want = (query.limit - start_at).min(MAX_PAGE_SIZE);
            let page = self.search_page(query, start_at, want).await?;
            let received = page.issues.len();
            items.extend(page.issues.into_iter().map(|issue| issue.into_raw(query)));
            debug!(project = %query.project, start_at, received, total = page.total, "jira page");
            if received == 0 || items.len() as u64 >= page.total {
                break;
            }
        }
        items.truncate(query.limit as usize);
        Ok(items)
    }
}

/// The `jira` plugin: `jira(#{ host: "https://jira.example.com", project: "OPS" })`.
pub fn plugin(settings: JiraSettings) -> Plugin {
    Plugin::new(PLUGIN_NAME).with_builtin(PLUGIN_NAME, move |args: BuiltinArgs| {
        args.expect_only(KNOWN_KEYS)?;
        let query = JiraQuery::from_args(&args)?;
        let client = JiraClient::new(&settings)
            .map_err(|e| Error::invalid_arguments(PLUGIN_NAME, format!("{e:#}")))?;
        let project = query.project.clone();
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
    #[serde(default)]
    total: u64,
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    key: String,
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct IssueFields {
    summary: String,
    description: Option<String>,
    status: Option<Named>,
    issuetype: Option<Named>,
    priority: Option<Named>,
    assignee: Option<Person>,
    reporter: Option<Person>,
    creator: Option<Person>,
    labels: Vec<String>,
    components: Vec<Named>,
    fix_versions: Vec<Named>,
    resolution: Option<Named>,
    created: Option<String>,
    updated: Option<String>,
    duedate: Option<String>,
}

fn names(items: Vec<Named>) -> Vec<String> {
    items.into_iter().map(|n| n.name).collect()
}

impl Issue {
    fn into_raw(self, query: &JiraQuery) -> RawItem {
        let f = self.fields;
        let url = query.browse_url(&self.key);
        RawItem::new(self.key.clone())
            .with_field("key", self.key)
            .with_field("url", url)
            .with_field("summary", f.summary)
            .with_field("description", f.description.unwrap_or_default())
            .with_field("ticket_status", json!(f.status.map(|s| s.name)))
            .with_field("issue_type", json!(f.issuetype.map(|s| s.name)))
            .with_field("ticket_priority", json!(f.priority.map(|s| s.name)))
            .with_field("assignee", json!(f.assignee.map(|p| p.display_name)))
            .with_field("reporter", json!(f.reporter.map(|p| p.display_name)))
            .with_field("creator", json!(f.creator.map(|p| p.display_name)))
            .with_field("labels", f.labels)
            .with_field("components", names(f.components))
            .with_field("fix_versions", names(f.fix_versions))
            .with_field("resolution", json!(f.resolution.map(|r| r.name)))
            .with_field("created", json!(f.created))
            .with_field("updated", json!(f.updated))
            .with_field("due_date", json!(f.duedate))
    }
}
