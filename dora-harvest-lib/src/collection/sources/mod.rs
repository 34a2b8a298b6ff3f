//! Upstream histories that produce deployment-like events and merged pull requests.
//!
//! Every scanner here relies on the upstream returning items newest-first. When that ordering
//! holds, stopping at the first item older than the window start loses nothing; if the upstream
//! ever changes its ordering, the scans under-collect silently rather than fail.

pub mod actions;
pub mod deployments_graphql;
pub mod deployments_rest;
pub mod pull_requests;
pub mod releases;

use super::client::{ApiResult, Client, Page, Validators};
use super::event::DeploymentLikeEvent;
use super::rate_budget::{RateBudget, RateLimitInfo};
use super::repo_config::{CollectionMethod, RepoConfig};
use super::window::CollectionWindow;
use crate::Result;
use ohno::{IntoAppError, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

const LOG_TARGET: &str = "   sources";

/// Items requested per REST page.
pub const PAGE_SIZE: u32 = 100;

/// Upper bound on REST and deployment pages scanned per repository.
pub const MAX_PAGES: u32 = 10;

/// How many times a rate-limited request is re-issued after waiting for the reset.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// What every source needs for one repository scan.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub client: &'a Client,
    pub budget: &'a RateBudget,
    pub window: &'a CollectionWindow,
}

impl SourceContext<'_> {
    /// Fetch one REST page without validators.
    pub async fn get_page(&self, url: &Url) -> Result<Page<serde_json::Value>> {
        execute(self.budget, url.as_str(), || self.client.get_json(url, &Validators::default())).await
    }

    /// Run one GraphQL query.
    pub async fn query<T: DeserializeOwned>(&self, what: &str, query: &str, variables: &serde_json::Value) -> Result<T> {
        execute(self.budget, what, || self.client.graphql(query, variables.clone())).await
    }
}

/// Cursor state of a GraphQL connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl PageInfo {
    /// The cursor to request next, if there is a next page.
    #[must_use]
    pub fn next_cursor(self) -> Option<String> {
        if self.has_next_page { self.end_cursor } else { None }
    }
}

/// Drive a request through the shared budget.
///
/// Waits on the budget before every attempt and records the observed rate limit of every
/// response. A rate-limited response marks the quota as exhausted until its reset and the
/// request is re-issued, up to a fixed number of times. Terminal outcomes become errors.
pub async fn execute<T, F, Fut>(budget: &RateBudget, what: &str, mut request: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut rate_limited = 0;
    loop {
        budget.check_and_wait().await;

        let result = request().await;
        budget.record(result.rate_limit());

        match result {
            ApiResult::Success(data, _) => return Ok(data),
            ApiResult::NotModified(_) => bail!("unexpected 'not modified' response for '{what}'"),
            ApiResult::NotFound(_) => bail!("'{what}' not found"),
            ApiResult::Failed(e, _) => return Err(e).into_app_err_with(|| format!("request for '{what}' failed")),
            ApiResult::RateLimited(rl) => {
                rate_limited += 1;
                if rate_limited > MAX_RATE_LIMIT_RETRIES {
                    bail!("request for '{what}' still rate limited after {MAX_RATE_LIMIT_RETRIES} retries");
                }

                budget.record(Some(RateLimitInfo { remaining: 0, ..rl }));
                log::info!(target: LOG_TARGET, "Rate limited on '{what}', retrying after reset (attempt {rate_limited})");
            }
        }
    }
}

/// Deserialize each raw item on its own, dropping the ones that do not fit.
///
/// Upstream records occasionally omit fields the scanners require; those are skipped rather than
/// failing the whole repository.
pub fn parse_items<T: DeserializeOwned>(items: Vec<serde_json::Value>, what: &str) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Skipping malformed {what}: {e}");
                None
            }
        })
        .collect()
}

/// Take the array stored under `key`, or the value itself when it already is an array.
pub fn take_array(value: serde_json::Value, key: &str) -> Vec<serde_json::Value> {
    match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove(key) {
            Some(serde_json::Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Collect the deployment-like events of one repository with the source its method selects.
pub async fn collect_events(ctx: SourceContext<'_>, repo: &RepoConfig, force_rest_deployments: bool) -> Result<Vec<DeploymentLikeEvent>> {
    match repo.method() {
        CollectionMethod::Actions => actions::collect(ctx, repo).await,
        CollectionMethod::Deployments if force_rest_deployments || repo.deployments().force_rest => deployments_rest::collect(ctx, repo).await,
        CollectionMethod::Deployments => deployments_graphql::collect(ctx, repo).await,
        CollectionMethod::Releases => releases::collect(ctx, repo).await,
    }
}

/// Case-insensitive allow-list check; an empty list allows everything.
pub(crate) fn allowed(allow_list: &[String], value: &str) -> bool {
    allow_list.is_empty() || allow_list.iter().any(|allowed| allowed.eq_ignore_ascii_case(value))
}

/// Status of a deployment that has no status yet.
pub(crate) const PENDING_STATUS: &str = "pending";
