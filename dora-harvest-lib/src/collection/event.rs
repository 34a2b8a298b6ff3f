use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which upstream history produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventSource {
    Actions,
    Deployments,
    Releases,
}

/// A workflow run, deployment, or release normalized into one shape.
///
/// Events of one repository form a set; their order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentLikeEvent {
    /// Namespaced by source, e.g. `release:123`.
    pub id: String,
    pub source: EventSource,
    pub name: String,
    pub display_title: String,

    /// Triggering event for runs, environment for deployments, tag for releases.
    pub event: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}
