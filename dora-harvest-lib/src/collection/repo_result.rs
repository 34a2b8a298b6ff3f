use super::repo_config::{CollectionMethod, RepoConfig};
use serde::{Deserialize, Serialize};

/// How a repository's numbers were obtained in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum RepoOutcome {
    /// Fetched from upstream and written to disk.
    Collected,

    /// Artifacts from an earlier run for the same window were reused.
    Reused,

    /// Marked done in the resumed run manifest.
    Resumed,

    /// Collection failed; counts are zero.
    Failed(String),
}

/// Summary of one repository's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCollectionResult {
    pub repo: String,
    pub method: CollectionMethod,
    pub pull_request_count: usize,
    pub deployment_event_count: usize,

    /// `true` unless the run was asked to refresh, whatever each sub-fetch actually hit.
    pub cached: bool,
    pub outcome: RepoOutcome,
}

impl RepoCollectionResult {
    #[must_use]
    pub fn new(repo: &RepoConfig, events: usize, pull_requests: usize, cached: bool, outcome: RepoOutcome) -> Self {
        Self {
            repo: repo.slug().to_string(),
            method: repo.method(),
            pull_request_count: pull_requests,
            deployment_event_count: events,
            cached,
            outcome,
        }
    }

    /// A zero-valued result recording why `repo` failed.
    #[must_use]
    pub fn failed(repo: &RepoConfig, cached: bool, error: String) -> Self {
        Self::new(repo, 0, 0, cached, RepoOutcome::Failed(error))
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.outcome, RepoOutcome::Failed(_))
    }
}
