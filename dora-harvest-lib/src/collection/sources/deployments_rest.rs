//! Deployments through the REST listing, one status request per candidate deployment.

use super::{MAX_PAGES, PAGE_SIZE, PENDING_STATUS, SourceContext, allowed, parse_items, take_array};
use crate::Result;
use crate::collection::event::{DeploymentLikeEvent, EventSource};
use crate::collection::repo_config::RepoConfig;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

const LOG_TARGET: &str = "deployment";

#[derive(Debug, Clone, Deserialize)]
struct Deployment {
    id: u64,
    #[serde(default)]
    sha: Option<String>,
    #[serde(default, rename = "ref")]
    git_ref: Option<String>,
    environment: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    creator: Option<Creator>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct Creator {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DeploymentStatus {
    state: String,
    created_at: DateTime<Utc>,
}

pub async fn collect(ctx: SourceContext<'_>, repo: &RepoConfig) -> Result<Vec<DeploymentLikeEvent>> {
    let options = repo.deployments();
    let path = format!("repos/{}/{}/deployments", repo.owner(), repo.name());
    let per_page = PAGE_SIZE.to_string();
    let mut events = Vec::new();

    'pages: for page in 1..=MAX_PAGES {
        let page_str = page.to_string();
        let url = ctx.client.endpoint(&path, &[("per_page", &per_page), ("page", &page_str)])?;
        let response = ctx.get_page(&url).await?;
        let deployments: Vec<Deployment> = parse_items(take_array(response.data, "deployments"), "deployment");

        for deployment in deployments {
            // Pages are newest-first: nothing after this can be inside the window.
            if ctx.window.is_before(deployment.created_at) {
                log::debug!(target: LOG_TARGET, "{repo}: reached deployments older than the window on page {page}");
                break 'pages;
            }

            if !ctx.window.contains(deployment.created_at) || !allowed(&options.environments, &deployment.environment) {
                continue;
            }

            let latest = latest_status(ctx, repo, deployment.id).await?;
            let state = latest.as_ref().map(|s| s.state.to_lowercase());
            if !allowed(&options.statuses, state.as_deref().unwrap_or(PENDING_STATUS)) {
                continue;
            }

            events.push(to_event(deployment, state, latest.map(|s| s.created_at)));
        }

        if !response.has_next {
            break;
        }
    }

    log::info!(target: LOG_TARGET, "{repo}: {} deployments in window", events.len());
    Ok(events)
}

/// The most recent status of one deployment; the listing is newest-first.
async fn latest_status(ctx: SourceContext<'_>, repo: &RepoConfig, id: u64) -> Result<Option<DeploymentStatus>> {
    let path = format!("repos/{}/{}/deployments/{id}/statuses", repo.owner(), repo.name());
    let url = ctx.client.endpoint(&path, &[("per_page", "1")])?;
    let response = ctx.get_page(&url).await?;
    Ok(parse_items(take_array(response.data, "statuses"), "deployment status").into_iter().next())
}

fn to_event(deployment: Deployment, state: Option<String>, completed_at: Option<DateTime<Utc>>) -> DeploymentLikeEvent {
    let mut metadata = BTreeMap::new();
    let _ = metadata.insert("environment".to_string(), deployment.environment.clone().into());
    if let Some(description) = &deployment.description {
        let _ = metadata.insert("description".to_string(), description.clone().into());
    }
    if let Some(creator) = deployment.creator {
        let _ = metadata.insert("creator".to_string(), creator.login.into());
    }

    DeploymentLikeEvent {
        id: format!("deployment:{}", deployment.id),
        source: EventSource::Deployments,
        name: deployment.environment.clone(),
        display_title: deployment.description.filter(|d| !d.is_empty()).unwrap_or_else(|| deployment.environment.clone()),
        event: deployment.environment,
        status: state.clone().unwrap_or_else(|| PENDING_STATUS.to_string()),
        conclusion: state,
        created_at: deployment.created_at,
        completed_at,
        branch: deployment.git_ref,
        commit_sha: deployment.sha,
        metadata,
    }
}
