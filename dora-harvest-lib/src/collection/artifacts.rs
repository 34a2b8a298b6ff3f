//! Per-repository JSON artifacts consumed by downstream aggregation.
//!
//! Layout: `<output_dir>/<owner>/<name>/{metadata,events,pull_requests}.json`. Every artifact
//! records when it was fetched and which window it covers.

use super::conditional_cache::CachedResponse;
use super::event::DeploymentLikeEvent;
use super::metadata::RepoMetadata;
use super::path_utils::repo_dir;
use super::pull_request::{ExcludedBot, PullRequestRecord};
use super::repo_config::{CollectionMethod, RepoConfig};
use super::window::CollectionWindow;
use crate::Result;
use chrono::{DateTime, Utc};
use ohno::IntoAppError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = " artifacts";

const METADATA_FILE: &str = "metadata.json";
const EVENTS_FILE: &str = "events.json";
const PULL_REQUESTS_FILE: &str = "pull_requests.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataArtifact {
    pub fetched_at: DateTime<Utc>,
    pub window: CollectionWindow,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub metadata: RepoMetadata,
}

impl MetadataArtifact {
    /// The validators and payload to revalidate against.
    #[must_use]
    pub fn into_cached(self) -> CachedResponse<RepoMetadata> {
        CachedResponse {
            data: self.metadata,
            etag: self.etag,
            last_modified: self.last_modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsArtifact {
    pub fetched_at: DateTime<Utc>,
    pub window: CollectionWindow,
    pub repo: String,
    pub method: CollectionMethod,
    pub events: Vec<DeploymentLikeEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestsArtifact {
    pub fetched_at: DateTime<Utc>,
    pub window: CollectionWindow,
    pub repo: String,
    pub base_branch: String,
    pub pull_requests: Vec<PullRequestRecord>,
    #[serde(default)]
    pub excluded_bots: Vec<ExcludedBot>,
}

/// Directory-backed store for collected artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn repo_dir(&self, repo: &RepoConfig) -> PathBuf {
        repo_dir(&self.root, repo.owner(), repo.name())
    }

    /// The previously stored metadata snapshot, if any. A missing or corrupt file is a miss.
    #[must_use]
    pub fn load_metadata(&self, repo: &RepoConfig) -> Option<MetadataArtifact> {
        load(&self.repo_dir(repo).join(METADATA_FILE), &format!("metadata of {repo}"))
    }

    pub fn save_metadata(&self, repo: &RepoConfig, artifact: &MetadataArtifact) -> Result<()> {
        save(artifact, &self.repo_dir(repo).join(METADATA_FILE))
    }

    /// Events and pull requests written by an earlier run for the same window.
    ///
    /// Both files must exist, parse, and cover `window`; anything else is a miss.
    #[must_use]
    pub fn load_collected(&self, repo: &RepoConfig, window: &CollectionWindow) -> Option<(EventsArtifact, PullRequestsArtifact)> {
        let dir = self.repo_dir(repo);
        let events: EventsArtifact = load(&dir.join(EVENTS_FILE), &format!("events of {repo}"))?;
        let pull_requests: PullRequestsArtifact = load(&dir.join(PULL_REQUESTS_FILE), &format!("pull requests of {repo}"))?;

        if events.window != *window || pull_requests.window != *window {
            log::debug!(target: LOG_TARGET, "Artifacts of {repo} cover a different window, collecting again");
            return None;
        }

        Some((events, pull_requests))
    }

    pub fn save_collected(&self, repo: &RepoConfig, events: &EventsArtifact, pull_requests: &PullRequestsArtifact) -> Result<()> {
        let dir = self.repo_dir(repo);
        save(events, &dir.join(EVENTS_FILE))?;
        save(pull_requests, &dir.join(PULL_REQUESTS_FILE))
    }
}

fn load<T: DeserializeOwned>(path: &Path, ctx: &str) -> Option<T> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            log::debug!(target: LOG_TARGET, "No stored {ctx}: {e:#}");
            return None;
        }
    };

    match serde_json::from_reader(BufReader::new(file)) {
        Ok(data) => {
            log::debug!(target: LOG_TARGET, "Loaded stored {ctx}");
            Some(data)
        }
        Err(e) => {
            log::debug!(target: LOG_TARGET, "Ignoring unreadable {ctx} at '{}': {e:#}", path.display());
            None
        }
    }
}

/// Write `data` as pretty JSON, creating parent directories as needed.
pub(crate) fn save<T: Serialize>(data: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).into_app_err_with(|| format!("unable to create directory '{}'", parent.display()))?;
    }

    let file = File::create(path).into_app_err_with(|| format!("unable to create file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data).into_app_err_with(|| format!("unable to write file '{}'", path.display()))?;
    writer.flush().into_app_err_with(|| format!("unable to flush file '{}'", path.display()))?;
    Ok(())
}
