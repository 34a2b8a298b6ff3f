//! Integration tests for the event and pull request sources against a mocked GitHub API

use dora_harvest_lib::collection::sources::{self, SourceContext, pull_requests::BotPolicy};
use dora_harvest_lib::collection::{
    ActionsOptions, BotClassifier, Client, CollectionMethod, CollectionWindow, DeploymentsOptions, EventSource, RateBudget,
    ReleasesOptions, RepoConfig, RetryConfig,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn window() -> CollectionWindow {
    CollectionWindow::parse("2024-01-01", "2024-01-31").unwrap()
}

fn client(server: &MockServer) -> Client {
    Client::new("test-token", &server.uri()).unwrap().with_retry(RetryConfig::NONE)
}

fn next_link(server: &MockServer, path: &str) -> String {
    format!("<{}{path}?per_page=100&page=2>; rel=\"next\"", server.uri())
}

#[tokio::test]
async fn test_actions_keeps_only_successful_matching_runs() {
    let server = MockServer::start().await;
    let window = window();

    Mock::given(method("GET"))
        .and(path("/repos/acme/api/actions/runs"))
        .and(query_param("status", "completed"))
        .and(query_param("created", window.created_filter().as_str()))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 3,
            "workflow_runs": [
                {
                    "id": 1, "name": "Deploy production", "display_title": "Release 1.2",
                    "event": "push", "status": "completed", "conclusion": "success",
                    "created_at": "2024-01-10T10:00:00Z", "updated_at": "2024-01-10T10:05:00Z",
                    "head_branch": "main", "head_sha": "abc123",
                    "run_attempt": 1, "run_number": 42, "html_url": "https://github.com/acme/api/actions/runs/1"
                },
                {
                    "id": 2, "name": "Deploy production", "display_title": "Release 1.3",
                    "event": "push", "status": "completed", "conclusion": "failure",
                    "created_at": "2024-01-11T10:00:00Z", "head_branch": "main"
                },
                {
                    "id": 3, "name": "Lint", "display_title": "Tidy",
                    "event": "push", "status": "completed", "conclusion": "success",
                    "created_at": "2024-01-12T10:00:00Z", "head_branch": "main"
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let budget = RateBudget::default();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/api", CollectionMethod::Actions).unwrap().with_actions(ActionsOptions {
        keywords: vec!["DEPLOY".into()],
        branch: Some("refs/heads/main".into()),
        ..ActionsOptions::default()
    });

    let events = sources::collect_events(ctx, &repo, false).await.unwrap();
    assert_eq!(events.len(), 1);

    let event = &events[0];
    assert_eq!(event.id, "actions:1");
    assert_eq!(event.source, EventSource::Actions);
    assert_eq!(event.branch.as_deref(), Some("main"));
    assert_eq!(event.commit_sha.as_deref(), Some("abc123"));
    assert_eq!(event.metadata.get("runNumber"), Some(&json!(42)));
}

#[tokio::test]
async fn test_actions_explicit_workflow_bypasses_keywords() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/api/actions/workflows/deploy.yml/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow_runs": [
                {
                    "id": 7, "name": "Ship it", "display_title": "Ship it",
                    "event": "workflow_dispatch", "status": "completed", "conclusion": "success",
                    "created_at": "2024-01-15T00:00:00Z"
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let budget = RateBudget::default();
    let window = window();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/api", CollectionMethod::Actions).unwrap().with_actions(ActionsOptions {
        workflow_id: Some("deploy.yml".into()),
        keywords: vec!["nothing-matches-this".into()],
        events: vec!["WORKFLOW_DISPATCH".into()],
        branch: None,
    });

    let events = sources::collect_events(ctx, &repo, false).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "workflow_dispatch");
}

#[tokio::test]
async fn test_releases_skip_prereleases_and_stop_at_older() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/cli/releases"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", next_link(&server, "/repos/acme/cli/releases").as_str())
                .set_body_json(json!([
                    {
                        "id": 30, "tag_name": "v2.0.0-rc1", "name": "RC", "draft": false, "prerelease": true,
                        "created_at": "2024-01-20T00:00:00Z", "published_at": "2024-01-20T01:00:00Z"
                    },
                    {
                        "id": 20, "tag_name": "v1.9.0", "name": "", "draft": false, "prerelease": false,
                        "created_at": "2024-01-05T00:00:00Z", "published_at": "2024-01-06T00:00:00Z",
                        "target_commitish": "main", "author": {"login": "alice"}
                    },
                    {
                        "id": 10, "tag_name": "v1.8.0", "name": "Old", "draft": false, "prerelease": false,
                        "created_at": "2023-12-01T00:00:00Z", "published_at": "2023-12-01T00:00:00Z"
                    }
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/cli/releases"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    let budget = RateBudget::default();
    let window = window();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/cli", CollectionMethod::Releases).unwrap();
    let events = sources::collect_events(ctx, &repo, false).await.unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.id, "release:20");
    assert_eq!(event.name, "v1.9.0");
    assert_eq!(event.event, "v1.9.0");
    assert_eq!(event.status, "completed");
    assert_eq!(event.conclusion.as_deref(), Some("success"));
    assert_eq!(event.created_at.to_rfc3339(), "2024-01-06T00:00:00+00:00");

    // With prereleases included and a tag filter, only the release candidate remains.
    let repo = RepoConfig::new("acme/cli", CollectionMethod::Releases)
        .unwrap()
        .with_releases(ReleasesOptions {
            include_prereleases: true,
            tag_pattern: Some("rc".into()),
        });

    server.verify().await;
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/cli/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 30, "tag_name": "v2.0.0-rc1", "name": "RC", "draft": false, "prerelease": true,
                "created_at": "2024-01-20T00:00:00Z", "published_at": null
            },
            {
                "id": 20, "tag_name": "v1.9.0", "draft": true, "prerelease": false,
                "created_at": "2024-01-05T00:00:00Z"
            }
        ])))
        .mount(&server)
        .await;

    let events = sources::collect_events(ctx, &repo, false).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, "release:30");
}

#[tokio::test]
async fn test_rest_deployments_break_at_first_older_deployment() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/deployments"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", next_link(&server, "/repos/acme/web/deployments").as_str())
                .set_body_json(json!([
                    {
                        "id": 3, "sha": "c3", "ref": "main", "environment": "Production",
                        "description": "Deploy 3", "creator": {"login": "alice"},
                        "created_at": "2024-01-20T00:00:00Z"
                    },
                    {
                        "id": 2, "sha": "c2", "ref": "main", "environment": "staging",
                        "created_at": "2024-01-15T00:00:00Z"
                    },
                    {
                        "id": 1, "sha": "c1", "ref": "main", "environment": "production",
                        "created_at": "2023-12-15T00:00:00Z"
                    }
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/deployments"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/deployments/3/statuses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"state": "SUCCESS", "created_at": "2024-01-20T00:10:00Z"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    // Filtered out by environment before any status lookup.
    Mock::given(method("GET"))
        .and(path("/repos/acme/web/deployments/2/statuses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    let budget = RateBudget::default();
    let window = window();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/web", CollectionMethod::Deployments)
        .unwrap()
        .with_deployments(DeploymentsOptions {
            environments: vec!["production".into()],
            statuses: vec!["success".into()],
            force_rest: false,
        });

    let events = sources::collect_events(ctx, &repo, true).await.unwrap();
    assert_eq!(events.len(), 1);

    let event = &events[0];
    assert_eq!(event.id, "deployment:3");
    assert_eq!(event.source, EventSource::Deployments);
    assert_eq!(event.status, "success");
    assert_eq!(event.event, "Production");
    assert_eq!(event.metadata.get("creator"), Some(&json!("alice")));
}

#[tokio::test]
async fn test_rest_deployments_without_status_count_as_pending() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/deployments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 5, "sha": "c5", "ref": "main", "environment": "production", "created_at": "2024-01-22T00:00:00Z"},
            {"id": 4, "sha": "c4", "ref": "main", "environment": "production", "created_at": "2024-01-21T00:00:00Z"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/web/deployments/5/statuses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/web/deployments/4/statuses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"state": "failure", "created_at": "2024-01-21T00:10:00Z"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let budget = RateBudget::default();
    let window = window();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/web", CollectionMethod::Deployments)
        .unwrap()
        .with_deployments(DeploymentsOptions {
            statuses: vec!["Pending".into()],
            ..DeploymentsOptions::default()
        });

    let events = sources::collect_events(ctx, &repo, true).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, "deployment:5");
    assert_eq!(events[0].status, "pending");
    assert_eq!(events[0].conclusion, None);
}

#[tokio::test]
async fn test_graphql_deployments_stop_mid_page() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("deployments("))
        .and(body_string_contains("latestStatus { state createdAt }"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "repository": {
                    "deployments": {
                        "pageInfo": {"hasNextPage": true, "endCursor": "d1"},
                        "nodes": [
                            {
                                "databaseId": 30, "createdAt": "2024-01-25T00:00:00Z", "environment": "production",
                                "description": "newest", "commitOid": "sha30", "ref": {"name": "main"},
                                "creator": {"login": "alice"},
                                "latestStatus": {"state": "SUCCESS", "createdAt": "2024-01-25T00:05:00Z"}
                            },
                            {
                                "databaseId": 20, "createdAt": "2023-12-20T00:00:00Z", "environment": "production",
                                "latestStatus": {"state": "SUCCESS", "createdAt": "2023-12-20T00:05:00Z"}
                            },
                            {
                                "databaseId": 10, "createdAt": "2024-01-10T00:00:00Z", "environment": "production",
                                "latestStatus": {"state": "SUCCESS", "createdAt": "2024-01-10T00:05:00Z"}
                            }
                        ]
                    }
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let budget = RateBudget::default();
    let window = window();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/web", CollectionMethod::Deployments).unwrap();
    let events = sources::collect_events(ctx, &repo, false).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, "deployment:30");
    assert_eq!(events[0].status, "success");
    assert_eq!(events[0].commit_sha.as_deref(), Some("sha30"));
}

fn pr_node(number: u64, merged_at: &str, login: &str) -> serde_json::Value {
    json!({
        "number": number,
        "title": format!("Change {number}"),
        "createdAt": "2023-12-01T00:00:00Z",
        "mergedAt": merged_at,
        "additions": 10,
        "deletions": 4,
        "changedFiles": 2,
        "headRefName": format!("feature-{number}"),
        "baseRefName": "main",
        "author": {"login": login}
    })
}

fn pr_page(nodes: &[serde_json::Value], end_cursor: &str) -> serde_json::Value {
    json!({
        "data": {
            "repository": {
                "pullRequests": {
                    "pageInfo": {"hasNextPage": true, "endCursor": end_cursor},
                    "nodes": nodes
                }
            }
        }
    })
}

#[tokio::test]
async fn test_pull_requests_stop_on_stale_page() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("pullRequests("))
        .and(body_partial_json(json!({"variables": {"cursor": null, "base": "main"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(pr_page(
            &[
                pr_node(12, "2024-01-20T00:00:00Z", "alice"),
                pr_node(11, "2024-01-18T00:00:00Z", "dependabot[bot]"),
                pr_node(10, "2023-12-28T00:00:00Z", "bob"),
            ],
            "c1",
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"cursor": "c1"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(pr_page(
            &[pr_node(9, "2023-12-20T00:00:00Z", "carol"), pr_node(8, "2023-12-10T00:00:00Z", "dave")],
            "c2",
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"cursor": "c2"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(pr_page(&[], "c3")))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    let budget = RateBudget::default();
    let window = window();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/api", CollectionMethod::Actions).unwrap();
    let classifier = BotClassifier::default();
    let bots = BotPolicy {
        classifier: &classifier,
        include_bots: false,
    };

    let set = sources::pull_requests::collect(ctx, &repo, "main", bots).await.unwrap();

    let numbers: Vec<_> = set.pull_requests.iter().map(|pr| pr.number).collect();
    assert_eq!(numbers, vec![12]);
    assert_eq!(set.pull_requests[0].author_login.as_deref(), Some("alice"));
    assert_eq!(set.pull_requests[0].changed_files_count, 2);

    assert_eq!(set.excluded_bots.len(), 1);
    assert_eq!(set.excluded_bots[0].number, 11);
    assert_eq!(set.excluded_bots[0].author_login, "dependabot[bot]");
}

#[tokio::test]
async fn test_rate_limited_request_is_retried_after_reset() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/cli/releases"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "1700000000")
                .set_body_json(json!({"message": "API rate limit exceeded"})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/cli/releases"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "4999")
                .insert_header("x-ratelimit-reset", "1700003600")
                .set_body_json(json!([
                    {
                        "id": 1, "tag_name": "v1.0.0", "draft": false, "prerelease": false,
                        "created_at": "2024-01-05T00:00:00Z"
                    }
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let budget = RateBudget::default();
    let window = window();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/cli", CollectionMethod::Releases).unwrap();
    let events = sources::collect_events(ctx, &repo, false).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(budget.snapshot().remaining, 4999);
}

#[tokio::test]
async fn test_too_many_requests_pauses_through_shared_budget() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/cli/releases"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/cli/releases"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "4998")
                .insert_header("x-ratelimit-reset", "1700003600")
                .set_body_json(json!([])),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Default transport retries: a 429 must still be left to the budget rather than retried blindly.
    let client = Client::new("test-token", &server.uri()).unwrap();
    let budget = RateBudget::new(100, core::time::Duration::ZERO);
    let window = window();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/cli", CollectionMethod::Releases).unwrap();
    let started = std::time::Instant::now();
    let events = sources::collect_events(ctx, &repo, false).await.unwrap();

    assert!(events.is_empty());
    assert!(started.elapsed() >= core::time::Duration::from_millis(900));
    assert_eq!(budget.snapshot().remaining, 4998);
}

#[tokio::test]
async fn test_missing_repository_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/gone/releases"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .mount(&server)
        .await;

    let client = client(&server);
    let budget = RateBudget::default();
    let window = window();
    let ctx = SourceContext {
        client: &client,
        budget: &budget,
        window: &window,
    };

    let repo = RepoConfig::new("acme/gone", CollectionMethod::Releases).unwrap();
    let err = sources::collect_events(ctx, &repo, false).await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}
