//! Deployments through one cursor-paginated GraphQL query that embeds each latest status.

use super::{MAX_PAGES, PENDING_STATUS, PageInfo, SourceContext, allowed, parse_items};
use crate::Result;
use crate::collection::event::{DeploymentLikeEvent, EventSource};
use crate::collection::repo_config::{DeploymentsOptions, RepoConfig};
use crate::collection::window::CollectionWindow;
use chrono::{DateTime, Utc};
use ohno::bail;
use serde::Deserialize;
use std::collections::BTreeMap;

const LOG_TARGET: &str = "deployment";

const QUERY: &str = r"
query($owner: String!, $name: String!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    deployments(first: 100, after: $cursor, orderBy: {field: CREATED_AT, direction: DESC}) {
      pageInfo { hasNextPage endCursor }
      nodes {
        databaseId
        createdAt
        environment
        description
        commitOid
        ref { name }
        creator { login }
        latestStatus { state createdAt }
      }
    }
  }
}";

#[derive(Debug, Deserialize)]
struct QueryData {
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    deployments: Connection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentNode {
    database_id: u64,
    created_at: DateTime<Utc>,
    environment: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    commit_oid: Option<String>,
    #[serde(default, rename = "ref")]
    git_ref: Option<RefName>,
    #[serde(default)]
    creator: Option<Login>,
    #[serde(default)]
    latest_status: Option<StatusNode>,
}

#[derive(Debug, Clone, Deserialize)]
struct RefName {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusNode {
    state: String,
    created_at: DateTime<Utc>,
}

/// What a page scan decided.
#[derive(Debug, PartialEq, Eq)]
enum Scan {
    Continue,
    ReachedOlder,
}

pub async fn collect(ctx: SourceContext<'_>, repo: &RepoConfig) -> Result<Vec<DeploymentLikeEvent>> {
    let mut events = Vec::new();
    let mut cursor: Option<String> = None;

    for page in 1..=MAX_PAGES {
        let variables = serde_json::json!({ "owner": repo.owner(), "name": repo.name(), "cursor": cursor });
        let data: QueryData = ctx.query(&format!("deployments of {repo}"), QUERY, &variables).await?;
        let Some(repository) = data.repository else {
            bail!("repository '{repo}' not found");
        };

        let connection = repository.deployments;
        let nodes: Vec<DeploymentNode> = parse_items(connection.nodes, "deployment node");
        if scan_page(nodes, repo.deployments(), ctx.window, &mut events) == Scan::ReachedOlder {
            log::debug!(target: LOG_TARGET, "{repo}: page {page} reached deployments older than the window");
            break;
        }

        match connection.page_info.next_cursor() {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    log::info!(target: LOG_TARGET, "{repo}: {} deployments in window", events.len());
    Ok(events)
}

/// Scan one newest-first page, stopping at the first node that predates the window even when
/// newer nodes preceded it on the same page.
fn scan_page(
    nodes: Vec<DeploymentNode>,
    options: &DeploymentsOptions,
    window: &CollectionWindow,
    events: &mut Vec<DeploymentLikeEvent>,
) -> Scan {
    for node in nodes {
        if window.is_before(node.created_at) {
            return Scan::ReachedOlder;
        }

        if !window.contains(node.created_at) || !allowed(&options.environments, &node.environment) {
            continue;
        }

        let latest = node.latest_status.clone();
        let state = latest.as_ref().map(|s| s.state.to_lowercase());
        if !allowed(&options.statuses, state.as_deref().unwrap_or(PENDING_STATUS)) {
            continue;
        }

        events.push(to_event(node, state, latest.map(|s| s.created_at)));
    }

    Scan::Continue
}

fn to_event(node: DeploymentNode, state: Option<String>, completed_at: Option<DateTime<Utc>>) -> DeploymentLikeEvent {
    let mut metadata = BTreeMap::new();
    let _ = metadata.insert("environment".to_string(), node.environment.clone().into());
    if let Some(description) = &node.description {
        let _ = metadata.insert("description".to_string(), description.clone().into());
    }
    if let Some(creator) = node.creator {
        let _ = metadata.insert("creator".to_string(), creator.login.into());
    }

    DeploymentLikeEvent {
        id: format!("deployment:{}", node.database_id),
        source: EventSource::Deployments,
        name: node.environment.clone(),
        display_title: node.description.filter(|d| !d.is_empty()).unwrap_or_else(|| node.environment.clone()),
        event: node.environment,
        status: state.clone().unwrap_or_else(|| PENDING_STATUS.to_string()),
        conclusion: state,
        created_at: node.created_at,
        completed_at,
        branch: node.git_ref.map(|r| r.name),
        commit_sha: node.commit_oid,
        metadata,
    }
}
