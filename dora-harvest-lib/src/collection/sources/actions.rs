//! Successful workflow runs as deployment-like events.

use super::{MAX_PAGES, PAGE_SIZE, SourceContext, parse_items, take_array};
use crate::Result;
use crate::collection::event::{DeploymentLikeEvent, EventSource};
use crate::collection::repo_config::{ActionsOptions, RepoConfig};
use crate::collection::window::CollectionWindow;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

const LOG_TARGET: &str = "   actions";

const BRANCH_PREFIX: &str = "refs/heads/";

#[derive(Debug, Clone, Deserialize)]
struct WorkflowRun {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_title: Option<String>,
    event: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    head_branch: Option<String>,
    #[serde(default)]
    head_sha: Option<String>,
    #[serde(default)]
    run_attempt: Option<u64>,
    #[serde(default)]
    run_number: Option<u64>,
    #[serde(default)]
    html_url: Option<String>,
}

pub async fn collect(ctx: SourceContext<'_>, repo: &RepoConfig) -> Result<Vec<DeploymentLikeEvent>> {
    let options = repo.actions();
    let path = options.workflow_id.as_ref().map_or_else(
        || format!("repos/{}/{}/actions/runs", repo.owner(), repo.name()),
        |workflow| format!("repos/{}/{}/actions/workflows/{workflow}/runs", repo.owner(), repo.name()),
    );

    let created = ctx.window.created_filter();
    let per_page = PAGE_SIZE.to_string();
    let mut events = Vec::new();

    for page in 1..=MAX_PAGES {
        let page_str = page.to_string();
        let url = ctx.client.endpoint(
            &path,
            &[
                ("status", "completed"),
                ("created", &created),
                ("per_page", &per_page),
                ("page", &page_str),
            ],
        )?;

        let response = ctx.get_page(&url).await?;
        let runs: Vec<WorkflowRun> = parse_items(take_array(response.data, "workflow_runs"), "workflow run");
        let page_len = runs.len();

        events.extend(runs.into_iter().filter(|run| accept(run, options, ctx.window)).map(to_event));

        log::debug!(target: LOG_TARGET, "{repo}: page {page} held {page_len} runs, {} accepted so far", events.len());
        if !response.has_next {
            break;
        }
    }

    log::info!(target: LOG_TARGET, "{repo}: {} successful deployment runs in window", events.len());
    Ok(events)
}

fn accept(run: &WorkflowRun, options: &ActionsOptions, window: &CollectionWindow) -> bool {
    if run.status.as_deref() != Some("completed") || run.conclusion.as_deref() != Some("success") {
        return false;
    }

    // The server-side `created` filter should already guarantee this.
    if !window.contains(run.created_at) {
        return false;
    }

    if options.workflow_id.is_none() && !matches_keywords(run, &options.keywords) {
        return false;
    }

    if !options.events.is_empty() && !options.events.contains(&run.event.to_lowercase()) {
        return false;
    }

    match &options.branch {
        Some(branch) => run.head_branch.as_deref().is_some_and(|observed| same_branch(branch, observed)),
        None => true,
    }
}

/// Case-insensitive keyword search over the run's name and display title. No keywords accepts all.
fn matches_keywords(run: &WorkflowRun, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }

    let haystack = format!(
        "{} {}",
        run.name.as_deref().unwrap_or_default(),
        run.display_title.as_deref().unwrap_or_default()
    )
    .to_lowercase();

    keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
}

/// `main` and `refs/heads/main` name the same branch.
fn branch_candidates(branch: &str) -> [String; 2] {
    let bare = branch.strip_prefix(BRANCH_PREFIX).unwrap_or(branch);
    [bare.to_string(), format!("{BRANCH_PREFIX}{bare}")]
}

fn same_branch(configured: &str, observed: &str) -> bool {
    let wanted = branch_candidates(configured);
    branch_candidates(observed).iter().any(|candidate| wanted.contains(candidate))
}

fn to_event(run: WorkflowRun) -> DeploymentLikeEvent {
    let name = run.name.unwrap_or_default();
    let mut metadata = BTreeMap::new();
    if let Some(attempt) = run.run_attempt {
        let _ = metadata.insert("runAttempt".to_string(), attempt.into());
    }
    if let Some(number) = run.run_number {
        let _ = metadata.insert("runNumber".to_string(), number.into());
    }
    if let Some(url) = run.html_url {
        let _ = metadata.insert("htmlUrl".to_string(), url.into());
    }

    DeploymentLikeEvent {
        id: format!("actions:{}", run.id),
        source: EventSource::Actions,
        display_title: run.display_title.unwrap_or_else(|| name.clone()),
        name,
        event: run.event,
        status: run.status.unwrap_or_default(),
        conclusion: run.conclusion,
        created_at: run.created_at,
        completed_at: run.updated_at,
        branch: run.head_branch,
        commit_sha: run.head_sha,
        metadata,
    }
}
