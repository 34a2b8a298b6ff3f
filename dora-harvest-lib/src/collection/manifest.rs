//! Per-run record of each repository's progress, persisted so an interrupted run can resume.

use super::artifacts;
use super::window::CollectionWindow;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const LOG_TARGET: &str = "  manifest";

pub const MANIFEST_FILE: &str = "manifest.json";

/// Where one repository stands within a run.
///
/// States only move forward; `Failed` is reachable from every state except `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RepoState {
    Pending,
    MetadataFetched,
    EventsCollected,
    PullRequestsCollected,
    Done,
    Failed,
}

impl RepoState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match next {
            Self::Failed => self != Self::Done,
            // A new run may restart any repository.
            Self::Pending => true,
            _ => !self.is_terminal() && next > self,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoEntry {
    pub slug: String,
    pub state: RepoState,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deployment_event_count: usize,
    #[serde(default)]
    pub pull_request_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub window: CollectionWindow,
    pub started_at: DateTime<Utc>,

    /// Keyed by lower-cased slug.
    #[serde(default)]
    pub repos: BTreeMap<String, RepoEntry>,
}

impl RunManifest {
    #[must_use]
    pub const fn new(window: CollectionWindow, started_at: DateTime<Utc>) -> Self {
        Self {
            window,
            started_at,
            repos: BTreeMap::new(),
        }
    }

    /// Load the manifest stored in `output_dir` if it exists, parses, and covers `window`.
    #[must_use]
    pub fn load_for(output_dir: &Path, window: &CollectionWindow) -> Option<Self> {
        let path = output_dir.join(MANIFEST_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                log::debug!(target: LOG_TARGET, "No manifest to resume from at '{}': {e:#}", path.display());
                return None;
            }
        };

        let manifest: Self = match serde_json::from_reader(BufReader::new(file)) {
            Ok(manifest) => manifest,
            Err(e) => {
                log::warn!(target: LOG_TARGET, "Ignoring unreadable manifest '{}': {e:#}", path.display());
                return None;
            }
        };

        if manifest.window != *window {
            log::warn!(
                target: LOG_TARGET,
                "Ignoring manifest for window {} while collecting {window}",
                manifest.window
            );
            return None;
        }

        Some(manifest)
    }

    pub fn save(&self, output_dir: &Path) -> Result<()> {
        artifacts::save(self, &output_dir.join(MANIFEST_FILE))
    }

    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&RepoEntry> {
        self.repos.get(key)
    }

    /// Whether `key` finished successfully in this manifest's window.
    #[must_use]
    pub fn is_done(&self, key: &str) -> bool {
        self.entry(key).is_some_and(|e| e.state == RepoState::Done)
    }

    /// Move `key` to `state`, creating its entry on first use. Invalid transitions are logged and ignored.
    pub fn transition(&mut self, key: &str, slug: &str, state: RepoState, now: DateTime<Utc>) {
        let entry = self.repos.entry(key.to_string()).or_insert_with(|| RepoEntry {
            slug: slug.to_string(),
            state: RepoState::Pending,
            updated_at: now,
            deployment_event_count: 0,
            pull_request_count: 0,
            error: None,
        });

        if entry.state != state && !entry.state.can_transition_to(state) {
            log::debug!(target: LOG_TARGET, "{slug}: ignoring transition {} -> {state}", entry.state);
            return;
        }

        if state == RepoState::Pending {
            entry.error = None;
            entry.deployment_event_count = 0;
            entry.pull_request_count = 0;
        }

        entry.state = state;
        entry.updated_at = now;
    }

    pub fn complete(&mut self, key: &str, slug: &str, events: usize, pull_requests: usize, now: DateTime<Utc>) {
        self.transition(key, slug, RepoState::Done, now);
        if let Some(entry) = self.repos.get_mut(key) {
            entry.deployment_event_count = events;
            entry.pull_request_count = pull_requests;
        }
    }

    pub fn fail(&mut self, key: &str, slug: &str, error: String, now: DateTime<Utc>) {
        self.transition(key, slug, RepoState::Failed, now);
        if let Some(entry) = self.repos.get_mut(key) {
            entry.error = Some(error);
        }
    }
}
