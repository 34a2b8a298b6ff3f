use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A merged pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestRecord {
    pub number: u64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub merged_at: DateTime<Utc>,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files_count: u64,
    pub head_ref: String,
    pub base_ref: String,
    pub author_login: Option<String>,
}

/// A pull request left out of the main list because its author is an automation account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedBot {
    pub number: u64,
    pub author_login: String,
}

/// Everything the pull-request scan produced for one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestSet {
    pub pull_requests: Vec<PullRequestRecord>,
    #[serde(default)]
    pub excluded_bots: Vec<ExcludedBot>,
}
