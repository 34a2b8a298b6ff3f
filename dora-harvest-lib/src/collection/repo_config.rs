use crate::Result;
use core::fmt::{Display, Formatter};
use ohno::bail;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which upstream history a repository's deployment-like events come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CollectionMethod {
    #[default]
    Actions,
    Deployments,
    Releases,
}

/// Filters applied to workflow runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionsOptions {
    /// Explicit workflow (numeric id or file name). Bypasses keyword matching when set.
    pub workflow_id: Option<String>,

    /// Case-insensitive substrings matched against a run's name and display title.
    pub keywords: Vec<String>,

    /// Lower-cased allow-list of triggering events (`push`, `workflow_dispatch`, ...).
    pub events: Vec<String>,

    pub branch: Option<String>,
}

/// Filters applied to deployments, in either the REST or the GraphQL variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentsOptions {
    /// Case-insensitive allow-list of environments. Empty means any environment.
    pub environments: Vec<String>,

    /// Case-insensitive allow-list of latest-status states; a deployment without one is `pending`.
    /// Empty means any state.
    pub statuses: Vec<String>,

    /// Use the REST listing instead of the GraphQL query.
    pub force_rest: bool,
}

/// Filters applied to releases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleasesOptions {
    pub include_prereleases: bool,

    /// Regular expression matched against tag names; falls back to substring matching when invalid.
    pub tag_pattern: Option<String>,
}

/// One repository to collect, with the method and filters that apply to it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRepoConfig")]
pub struct RepoConfig {
    owner: Arc<str>,
    name: Arc<str>,
    slug: Arc<str>,
    method: CollectionMethod,
    actions: ActionsOptions,
    deployments: DeploymentsOptions,
    releases: ReleasesOptions,
}

/// The shape of a `[[repos]]` entry in the configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRepoConfig {
    slug: String,
    #[serde(default)]
    method: CollectionMethod,
    #[serde(default)]
    workflow_id: Option<String>,
    #[serde(default)]
    workflow_keywords: Vec<String>,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    environments: Vec<String>,
    #[serde(default)]
    statuses: Vec<String>,
    #[serde(default)]
    force_rest: bool,
    #[serde(default)]
    include_prereleases: bool,
    #[serde(default)]
    tag_pattern: Option<String>,
}

impl TryFrom<RawRepoConfig> for RepoConfig {
    type Error = ohno::AppError;

    fn try_from(raw: RawRepoConfig) -> Result<Self> {
        Ok(Self::new(&raw.slug, raw.method)?
            .with_actions(ActionsOptions {
                workflow_id: raw.workflow_id,
                keywords: raw.workflow_keywords,
                events: raw.events,
                branch: raw.branch,
            })
            .with_deployments(DeploymentsOptions {
                environments: raw.environments,
                statuses: raw.statuses,
                force_rest: raw.force_rest,
            })
            .with_releases(ReleasesOptions {
                include_prereleases: raw.include_prereleases,
                tag_pattern: raw.tag_pattern,
            }))
    }
}

impl RepoConfig {
    /// Create a configuration for `owner/name` with default filters.
    pub fn new(slug: &str, method: CollectionMethod) -> Result<Self> {
        let slug = slug.trim().trim_end_matches('/');
        let Some((owner, name)) = slug.split_once('/') else {
            bail!("invalid repository slug '{slug}': expected 'owner/name'");
        };

        let name = name.trim_end_matches(".git");
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("invalid repository slug '{slug}': expected 'owner/name'");
        }

        if !owner.chars().chain(name.chars()).all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
            bail!("invalid repository slug '{slug}': unexpected characters");
        }

        Ok(Self {
            owner: Arc::from(owner),
            name: Arc::from(name),
            slug: Arc::from(format!("{owner}/{name}")),
            method,
            actions: ActionsOptions::default(),
            deployments: DeploymentsOptions::default(),
            releases: ReleasesOptions::default(),
        })
    }

    #[must_use]
    pub fn with_actions(mut self, options: ActionsOptions) -> Self {
        self.actions = ActionsOptions {
            events: options.events.iter().map(|e| e.to_lowercase()).collect(),
            ..options
        };
        self
    }

    #[must_use]
    pub fn with_deployments(mut self, options: DeploymentsOptions) -> Self {
        self.deployments = DeploymentsOptions {
            statuses: options.statuses.iter().map(|s| s.to_lowercase()).collect(),
            ..options
        };
        self
    }

    #[must_use]
    pub fn with_releases(mut self, options: ReleasesOptions) -> Self {
        self.releases = options;
        self
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Identity used for de-duplication and manifest lookups.
    #[must_use]
    pub fn key(&self) -> String {
        self.slug.to_lowercase()
    }

    #[must_use]
    pub const fn method(&self) -> CollectionMethod {
        self.method
    }

    #[must_use]
    pub const fn actions(&self) -> &ActionsOptions {
        &self.actions
    }

    #[must_use]
    pub const fn deployments(&self) -> &DeploymentsOptions {
        &self.deployments
    }

    #[must_use]
    pub const fn releases(&self) -> &ReleasesOptions {
        &self.releases
    }
}

impl Display for RepoConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.slug)
    }
}
