//! Merged pull requests against one base branch.

use super::{PageInfo, SourceContext, parse_items};
use crate::Result;
use crate::collection::bot_classifier::BotClassifier;
use crate::collection::pull_request::{ExcludedBot, PullRequestRecord, PullRequestSet};
use crate::collection::repo_config::RepoConfig;
use crate::collection::window::CollectionWindow;
use chrono::{DateTime, Utc};
use ohno::bail;
use serde::Deserialize;

const LOG_TARGET: &str = "     pulls";

const QUERY: &str = r"
query($owner: String!, $name: String!, $base: String!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    pullRequests(first: 100, after: $cursor, states: MERGED, baseRefName: $base, orderBy: {field: UPDATED_AT, direction: DESC}) {
      pageInfo { hasNextPage endCursor }
      nodes {
        number
        title
        createdAt
        mergedAt
        additions
        deletions
        changedFiles
        headRefName
        baseRefName
        author { login }
      }
    }
  }
}";

#[derive(Debug, Deserialize)]
struct QueryData {
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Repository {
    pull_requests: Connection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    number: u64,
    title: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    changed_files: u64,
    head_ref_name: String,
    base_ref_name: String,
    #[serde(default)]
    author: Option<Author>,
}

#[derive(Debug, Clone, Deserialize)]
struct Author {
    login: String,
}

/// How bot-authored pull requests are treated.
#[derive(Debug, Clone, Copy)]
pub struct BotPolicy<'a> {
    pub classifier: &'a BotClassifier,

    /// Keep bot-authored pull requests in the main list.
    pub include_bots: bool,
}

pub async fn collect(ctx: SourceContext<'_>, repo: &RepoConfig, base_branch: &str, bots: BotPolicy<'_>) -> Result<PullRequestSet> {
    let mut set = PullRequestSet::default();
    let mut cursor: Option<String> = None;
    let mut page = 0;

    loop {
        page += 1;
        let variables = serde_json::json!({
            "owner": repo.owner(),
            "name": repo.name(),
            "base": base_branch,
            "cursor": cursor,
        });

        let data: QueryData = ctx.query(&format!("pull requests of {repo}"), QUERY, &variables).await?;
        let Some(repository) = data.repository else {
            bail!("repository '{repo}' not found");
        };

        let connection = repository.pull_requests;
        let nodes: Vec<PullRequestNode> = parse_items(connection.nodes, "pull request");
        if page_is_stale(&nodes, ctx.window) {
            log::debug!(target: LOG_TARGET, "{repo}: page {page} holds nothing merged inside the window, stopping");
            break;
        }

        for node in nodes {
            retain(node, ctx.window, bots, &mut set);
        }

        match connection.page_info.next_cursor() {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    log::info!(
        target: LOG_TARGET,
        "{repo}: {} merged pull requests in window ({} from bots excluded)",
        set.pull_requests.len(),
        set.excluded_bots.len()
    );
    Ok(set)
}

/// Every node is unmerged or merged before the window. With newest-first ordering no later page
/// can hold anything newer.
fn page_is_stale(nodes: &[PullRequestNode], window: &CollectionWindow) -> bool {
    nodes.iter().all(|node| node.merged_at.is_none_or(|merged| window.is_before(merged)))
}

fn retain(node: PullRequestNode, window: &CollectionWindow, bots: BotPolicy<'_>, set: &mut PullRequestSet) {
    let Some(merged_at) = node.merged_at.filter(|m| window.contains(*m)) else {
        return;
    };

    let author_login = node.author.map(|a| a.login);
    if !bots.include_bots
        && let Some(login) = author_login.as_deref()
        && bots.classifier.is_bot(login)
    {
        set.excluded_bots.push(ExcludedBot {
            number: node.number,
            author_login: login.to_string(),
        });
        return;
    }

    set.pull_requests.push(PullRequestRecord {
        number: node.number,
        title: node.title,
        created_at: node.created_at,
        merged_at,
        additions: node.additions,
        deletions: node.deletions,
        changed_files_count: node.changed_files,
        head_ref: node.head_ref_name,
        base_ref: node.base_ref_name,
        author_login,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(number: u64, merged_at: Option<&str>, login: &str) -> PullRequestNode {
        serde_json::from_value(serde_json::json!({
            "number": number,
            "title": format!("PR {number}"),
            "createdAt": "2023-12-01T00:00:00Z",
            "mergedAt": merged_at,
            "additions": 10,
            "deletions": 2,
            "changedFiles": 3,
            "headRefName": "feature",
            "baseRefName": "main",
            "author": {"login": login}
        }))
        .unwrap()
    }

    fn window() -> CollectionWindow {
        CollectionWindow::parse("2024-01-01", "2024-01-31").unwrap()
    }

    #[test]
    fn fully_stale_page() {
        let nodes = vec![node(1, Some("2023-12-30T00:00:00Z"), "alice"), node(2, None, "bob")];
        assert!(page_is_stale(&nodes, &window()));
        assert!(page_is_stale(&[], &window()));
    }

    #[test]
    fn mixed_page_is_not_stale() {
        let nodes = vec![node(1, Some("2023-12-30T00:00:00Z"), "alice"), node(2, Some("2024-01-05T00:00:00Z"), "bob")];
        assert!(!page_is_stale(&nodes, &window()));
    }

    #[test]
    fn newer_than_window_is_not_stale() {
        let nodes = vec![node(1, Some("2024-03-01T00:00:00Z"), "alice")];
        assert!(!page_is_stale(&nodes, &window()));
    }

    #[test]
    fn retains_only_merges_inside_window() {
        let classifier = BotClassifier::default();
        let bots = BotPolicy {
            classifier: &classifier,
            include_bots: false,
        };

        let mut set = PullRequestSet::default();
        for n in [
            node(1, Some("2024-01-05T00:00:00Z"), "alice"),
            node(2, Some("2023-12-05T00:00:00Z"), "alice"),
            node(3, Some("2024-02-05T00:00:00Z"), "alice"),
            node(4, None, "alice"),
        ] {
            retain(n, &window(), bots, &mut set);
        }

        assert_eq!(set.pull_requests.len(), 1);
        let pr = &set.pull_requests[0];
        assert_eq!(pr.number, 1);
        assert_eq!(pr.changed_files_count, 3);
        assert_eq!(pr.author_login.as_deref(), Some("alice"));
    }

    #[test]
    fn bots_are_recorded_separately() {
        let classifier = BotClassifier::default();
        let mut set = PullRequestSet::default();
        let bots = BotPolicy {
            classifier: &classifier,
            include_bots: false,
        };

        retain(node(7, Some("2024-01-05T00:00:00Z"), "dependabot[bot]"), &window(), bots, &mut set);
        retain(node(8, Some("2024-01-06T00:00:00Z"), "renovate-bot"), &window(), bots, &mut set);

        assert!(set.pull_requests.is_empty());
        assert_eq!(
            set.excluded_bots,
            vec![
                ExcludedBot {
                    number: 7,
                    author_login: "dependabot[bot]".into()
                },
                ExcludedBot {
                    number: 8,
                    author_login: "renovate-bot".into()
                },
            ]
        );
    }

    #[test]
    fn bots_can_be_included() {
        let classifier = BotClassifier::default();
        let mut set = PullRequestSet::default();
        let bots = BotPolicy {
            classifier: &classifier,
            include_bots: true,
        };

        retain(node(7, Some("2024-01-05T00:00:00Z"), "dependabot[bot]"), &window(), bots, &mut set);
        assert_eq!(set.pull_requests.len(), 1);
        assert!(set.excluded_bots.is_empty());
    }
}
