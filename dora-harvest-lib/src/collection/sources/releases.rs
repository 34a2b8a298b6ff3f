//! Published releases as deployment-like events.

use super::{MAX_PAGES, PAGE_SIZE, SourceContext, parse_items, take_array};
use crate::Result;
use crate::collection::event::{DeploymentLikeEvent, EventSource};
use crate::collection::repo_config::{ReleasesOptions, RepoConfig};
use crate::collection::window::CollectionWindow;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

const LOG_TARGET: &str = "  releases";

#[derive(Debug, Clone, Deserialize)]
struct Release {
    id: u64,
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    created_at: DateTime<Utc>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    target_commitish: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    author: Option<Author>,
}

#[derive(Debug, Clone, Deserialize)]
struct Author {
    login: String,
}

impl Release {
    /// Publication time, or creation time for releases never published.
    fn timestamp(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.created_at)
    }
}

/// Tag filter: a regular expression when the pattern compiles, a plain substring otherwise.
#[derive(Debug, Clone)]
pub enum TagMatcher {
    Regex(Regex),
    Substring(String),
}

impl TagMatcher {
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => Self::Regex(re),
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Tag pattern '{pattern}' is not a valid regular expression, matching it as a substring: {e}");
                Self::Substring(pattern.to_string())
            }
        }
    }

    #[must_use]
    pub fn is_match(&self, tag: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(tag),
            Self::Substring(s) => tag.contains(s.as_str()),
        }
    }
}

/// What to do with one release of a newest-first listing.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Accept,
    Skip,
    Stop,
}

pub async fn collect(ctx: SourceContext<'_>, repo: &RepoConfig) -> Result<Vec<DeploymentLikeEvent>> {
    let options = repo.releases();
    let matcher = options.tag_pattern.as_deref().map(TagMatcher::new);
    let path = format!("repos/{}/{}/releases", repo.owner(), repo.name());
    let per_page = PAGE_SIZE.to_string();
    let mut events = Vec::new();

    'pages: for page in 1..=MAX_PAGES {
        let page_str = page.to_string();
        let url = ctx.client.endpoint(&path, &[("per_page", &per_page), ("page", &page_str)])?;
        let response = ctx.get_page(&url).await?;
        let releases: Vec<Release> = parse_items(take_array(response.data, "releases"), "release");

        for release in releases {
            match judge(&release, options, matcher.as_ref(), ctx.window) {
                Verdict::Accept => events.push(to_event(release)),
                Verdict::Skip => {}
                Verdict::Stop => {
                    log::debug!(target: LOG_TARGET, "{repo}: reached releases older than the window on page {page}");
                    break 'pages;
                }
            }
        }

        if !response.has_next {
            break;
        }
    }

    log::info!(target: LOG_TARGET, "{repo}: {} releases in window", events.len());
    Ok(events)
}

fn judge(release: &Release, options: &ReleasesOptions, matcher: Option<&TagMatcher>, window: &CollectionWindow) -> Verdict {
    let ts = release.timestamp();
    if window.is_before(ts) {
        return Verdict::Stop;
    }

    if !window.contains(ts) || (release.prerelease && !options.include_prereleases) {
        return Verdict::Skip;
    }

    if matcher.is_some_and(|m| !m.is_match(&release.tag_name)) {
        return Verdict::Skip;
    }

    Verdict::Accept
}

fn to_event(release: Release) -> DeploymentLikeEvent {
    let (status, conclusion) = if release.draft {
        ("draft", "draft")
    } else {
        ("completed", "success")
    };

    let created_at = release.timestamp();
    let mut metadata = BTreeMap::new();
    let _ = metadata.insert("tagName".to_string(), release.tag_name.clone().into());
    let _ = metadata.insert("prerelease".to_string(), release.prerelease.into());
    if let Some(url) = release.html_url {
        let _ = metadata.insert("htmlUrl".to_string(), url.into());
    }
    if let Some(author) = release.author {
        let _ = metadata.insert("author".to_string(), author.login.into());
    }

    let name = release.name.filter(|n| !n.is_empty()).unwrap_or_else(|| release.tag_name.clone());
    DeploymentLikeEvent {
        id: format!("release:{}", release.id),
        source: EventSource::Releases,
        display_title: name.clone(),
        name,
        event: release.tag_name,
        status: status.to_string(),
        conclusion: Some(conclusion.to_string()),
        created_at,
        completed_at: release.published_at,
        branch: release.target_commitish,
        commit_sha: None,
        metadata,
    }
}
