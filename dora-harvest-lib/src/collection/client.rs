//! GitHub API client
//!
//! Thin REST and GraphQL transport that classifies every response and surfaces the observed
//! rate-limit headers as an explicit value instead of mutating shared state.

use super::rate_budget::RateLimitInfo;
use super::resilient_http::{OutgoingRequest, RetryConfig, resilient_send};
use chrono::Utc;
use core::time::Duration;
use ohno::{IntoAppError, app_err};
use reqwest::header::{
    ACCEPT, AUTHORIZATION, ETAG, HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LINK, RETRY_AFTER,
};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const LOG_TARGET: &str = "    client";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "dora-harvest";

/// Pause for a 429 without a usable `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Pause for a GraphQL rate-limit error that carried no rate-limit headers.
const GRAPHQL_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(60);

/// Conditional-request validators from a previously received response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// One successful response body plus the headers the collection engine cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub data: T,
    pub etag: Option<String>,
    pub last_modified: Option<String>,

    /// Whether a `Link: rel="next"` header was present.
    pub has_next: bool,
}

/// Result of an API call
#[derive(Debug)]
pub enum ApiResult<T> {
    /// Request succeeded - contains data and optional rate limit info
    Success(T, Option<RateLimitInfo>),

    /// The server answered 304 to a conditional request
    NotModified(Option<RateLimitInfo>),

    /// Quota exhausted - should retry after reset time
    RateLimited(RateLimitInfo),

    /// The requested resource was not found (404)
    NotFound(Option<RateLimitInfo>),

    /// Request failed permanently - should NOT retry
    Failed(ohno::AppError, Option<RateLimitInfo>),
}

impl<T> ApiResult<T> {
    /// The rate-limit headers observed on this response, whatever its outcome.
    #[must_use]
    pub const fn rate_limit(&self) -> Option<RateLimitInfo> {
        match self {
            Self::Success(_, rl) | Self::NotModified(rl) | Self::NotFound(rl) | Self::Failed(_, rl) => *rl,
            Self::RateLimited(rl) => Some(*rl),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResult<U> {
        match self {
            Self::Success(data, rl) => ApiResult::Success(f(data), rl),
            Self::NotModified(rl) => ApiResult::NotModified(rl),
            Self::RateLimited(rl) => ApiResult::RateLimited(rl),
            Self::NotFound(rl) => ApiResult::NotFound(rl),
            Self::Failed(e, rl) => ApiResult::Failed(e, rl),
        }
    }
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

/// GitHub API client
#[derive(Debug, Clone)]
#[expect(clippy::struct_field_names, reason = "client field stores the underlying HTTP client")]
pub struct Client {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryConfig,
}

impl Client {
    /// Create a client authenticated with `token` against `base_url`.
    pub fn new(token: &str, base_url: &str) -> crate::Result<Self> {
        let mut auth_val = HeaderValue::from_str(&format!("Bearer {token}")).into_app_err("token contains invalid characters")?;
        auth_val.set_sensitive(true);

        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, auth_val);
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let _ = headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .into_app_err("unable to create HTTP client")?;

        // A trailing slash makes `Url::join` append rather than replace the last segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).into_app_err_with(|| format!("invalid API URL '{base_url}'"))?;

        Ok(Self {
            client,
            base_url,
            retry: RetryConfig::DEFAULT,
        })
    }

    /// Replace the retry policy used for every request.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Build an endpoint URL from a path relative to the API root and a set of query pairs.
    pub fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> crate::Result<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .into_app_err_with(|| format!("invalid API path '{path}'"))?;

        if !query.is_empty() {
            let _ = url.query_pairs_mut().extend_pairs(query);
        }

        Ok(url)
    }

    /// Issue a GET, sending `validators` as conditional headers, and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url, validators: &Validators) -> ApiResult<Page<T>> {
        let mut request = OutgoingRequest::get(url.clone());
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let resp = match resilient_send(&self.client, self.retry, request).await {
            Ok(r) => r,
            Err(e) => return ApiResult::Failed(e, None),
        };

        let rate_limit = RateLimitInfo::from_headers(resp.headers());
        if resp.status() == StatusCode::NOT_MODIFIED {
            return ApiResult::NotModified(rate_limit);
        }

        let resp = match classify(resp, rate_limit) {
            Ok(resp) => resp,
            Err(outcome) => return outcome,
        };

        let etag = header_string(resp.headers(), ETAG);
        let last_modified = header_string(resp.headers(), LAST_MODIFIED);
        let has_next = has_next_page(resp.headers());

        match resp.json::<T>().await {
            Ok(data) => ApiResult::Success(
                Page {
                    data,
                    etag,
                    last_modified,
                    has_next,
                },
                rate_limit,
            ),
            Err(e) => ApiResult::Failed(app_err!("malformed JSON response from '{url}': {e}"), rate_limit),
        }
    }

    /// POST a GraphQL query and decode its `data` member.
    ///
    /// A response carrying `errors` without `data` is a failure; partial data is accepted.
    pub async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: serde_json::Value) -> ApiResult<T> {
        let url = match self.endpoint("graphql", &[]) {
            Ok(url) => url,
            Err(e) => return ApiResult::Failed(e, None),
        };

        let body = serde_json::json!({ "query": query, "variables": variables });
        let resp = match resilient_send(&self.client, self.retry, OutgoingRequest::post_json(url, body)).await {
            Ok(r) => r,
            Err(e) => return ApiResult::Failed(e, None),
        };

        let rate_limit = RateLimitInfo::from_headers(resp.headers());
        let resp = match classify(resp, rate_limit) {
            Ok(resp) => resp,
            Err(outcome) => return outcome,
        };

        let decoded = match resp.json::<GraphQlResponse<T>>().await {
            Ok(decoded) => decoded,
            Err(e) => return ApiResult::Failed(app_err!("malformed GraphQL response: {e}"), rate_limit),
        };

        let messages = decoded.errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ");
        match decoded.data {
            Some(data) => {
                if !messages.is_empty() {
                    log::debug!(target: LOG_TARGET, "GraphQL response carried partial errors: {messages}");
                }
                ApiResult::Success(data, rate_limit)
            }
            None if messages.contains("rate limit") => {
                ApiResult::RateLimited(rate_limit.unwrap_or_else(|| pause_for(GRAPHQL_RATE_LIMIT_PAUSE)))
            }
            None if messages.is_empty() => ApiResult::Failed(app_err!("GraphQL response carried no data"), rate_limit),
            None => ApiResult::Failed(app_err!("GraphQL query failed: {messages}"), rate_limit),
        }
    }
}

/// Pass successful responses through; map everything else to its terminal outcome.
fn classify<T>(resp: Response, rate_limit: Option<RateLimitInfo>) -> Result<Response, ApiResult<T>> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    // Secondary rate limits name their own pause, independent of the hourly quota.
    if let Some(delay) = parse_retry_after(resp.headers())
        && matches!(status, StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN)
    {
        return Err(ApiResult::RateLimited(pause_for(delay)));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let exhausted = rate_limit.filter(|rl| rl.remaining == 0);
        return Err(ApiResult::RateLimited(exhausted.unwrap_or_else(|| pause_for(DEFAULT_RETRY_AFTER))));
    }

    // A 403 is a quota problem only when the quota is actually gone; otherwise it is a permission error.
    if status == StatusCode::FORBIDDEN
        && let Some(rl) = rate_limit
        && rl.remaining == 0
    {
        return Err(ApiResult::RateLimited(rl));
    }

    if status == StatusCode::NOT_FOUND {
        return Err(ApiResult::NotFound(rate_limit));
    }

    let url = resp.url().clone();
    Err(ApiResult::Failed(app_err!("HTTP {status} from '{url}'"), rate_limit))
}

/// An exhausted quota that frees up after `delay`.
fn pause_for(delay: Duration) -> RateLimitInfo {
    RateLimitInfo {
        remaining: 0,
        reset_at: Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::minutes(1)),
    }
}

/// Parse the `Retry-After` header value as seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let s = headers.get(RETRY_AFTER).and_then(|h| h.to_str().ok())?;
    s.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn has_next_page(headers: &HeaderMap) -> bool {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|link| link.contains("rel=\"next\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> Client {
        Client::new("test-token", &server.uri()).unwrap().with_retry(RetryConfig::NONE)
    }

    #[test]
    fn endpoint_joins_paths_and_query() {
        let client = Client::new("t", "https://ghe.example.com/api/v3/").unwrap();
        let url = client
            .endpoint("/repos/o/r/actions/runs", &[("per_page", "100"), ("created", "a..b")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/o/r/actions/runs?per_page=100&created=a..b"
        );
        assert_eq!(client.base_url(), "https://ghe.example.com/api/v3");
    }

    #[test]
    fn next_link_detection() {
        let mut headers = HeaderMap::new();
        assert!(!has_next_page(&headers));

        let _ = headers.insert(
            LINK,
            HeaderValue::from_static(r#"<https://api.github.com/x?page=2>; rel="next", <https://api.github.com/x?page=5>; rel="last""#),
        );
        assert!(has_next_page(&headers));

        let _ = headers.insert(LINK, HeaderValue::from_static(r#"<https://api.github.com/x?page=1>; rel="prev""#));
        assert!(!has_next_page(&headers));
    }

    #[tokio::test]
    async fn success_carries_validators_and_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"abc\"")
                    .insert_header("x-ratelimit-remaining", "4321")
                    .insert_header("x-ratelimit-reset", "1704067200")
                    .set_body_json(serde_json::json!({"full_name": "o/r"})),
            )
            .mount(&server)
            .await;

        let client = client(&server).await;
        let url = client.endpoint("repos/o/r", &[]).unwrap();
        let ApiResult::Success(page, rl) = client.get_json::<serde_json::Value>(&url, &Validators::default()).await else {
            panic!("expected success");
        };

        assert_eq!(page.data["full_name"], "o/r");
        assert_eq!(page.etag.as_deref(), Some("\"abc\""));
        assert!(!page.has_next);
        assert_eq!(rl.unwrap().remaining, 4321);
    }

    #[tokio::test]
    async fn conditional_headers_and_not_modified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r"))
            .and(header("if-none-match", "\"abc\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let url = client.endpoint("repos/o/r", &[]).unwrap();
        let validators = Validators {
            etag: Some("\"abc\"".into()),
            last_modified: None,
        };

        let result = client.get_json::<serde_json::Value>(&url, &validators).await;
        assert!(matches!(result, ApiResult::NotModified(_)));
    }

    #[tokio::test]
    async fn forbidden_with_exhausted_quota_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-reset", "1704067200"),
            )
            .mount(&server)
            .await;

        let client = client(&server).await;
        let url = client.endpoint("repos/o/r", &[]).unwrap();
        let result = client.get_json::<serde_json::Value>(&url, &Validators::default()).await;
        let ApiResult::RateLimited(rl) = result else {
            panic!("expected rate limited");
        };
        assert_eq!(rl.reset_at.timestamp(), 1_704_067_200);
    }

    #[tokio::test]
    async fn forbidden_with_quota_left_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "10"))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let url = client.endpoint("repos/o/r", &[]).unwrap();
        let result = client.get_json::<serde_json::Value>(&url, &Validators::default()).await;
        assert!(matches!(result, ApiResult::Failed(..)));
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited_for_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "30")
                    .insert_header("x-ratelimit-remaining", "4000")
                    .insert_header("x-ratelimit-reset", "1704067200"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new("test-token", &server.uri()).unwrap();
        let url = client.endpoint("repos/o/r", &[]).unwrap();
        let before = Utc::now();
        let ApiResult::RateLimited(rl) = client.get_json::<serde_json::Value>(&url, &Validators::default()).await else {
            panic!("expected rate limited");
        };

        assert_eq!(rl.remaining, 0);
        assert!(rl.reset_at >= before + chrono::Duration::seconds(30));
        assert!(rl.reset_at <= Utc::now() + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn too_many_requests_without_headers_pauses_briefly() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(429)).mount(&server).await;

        let client = client(&server).await;
        let url = client.endpoint("repos/o/r", &[]).unwrap();
        let ApiResult::RateLimited(rl) = client.get_json::<serde_json::Value>(&url, &Validators::default()).await else {
            panic!("expected rate limited");
        };

        assert_eq!(rl.remaining, 0);
        assert!(rl.reset_at <= Utc::now() + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn secondary_limit_on_forbidden_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("retry-after", "2")
                    .insert_header("x-ratelimit-remaining", "10"),
            )
            .mount(&server)
            .await;

        let client = client(&server).await;
        let result = client.graphql::<serde_json::Value>("query { viewer { login } }", serde_json::json!({})).await;
        let ApiResult::RateLimited(rl) = result else {
            panic!("expected rate limited");
        };
        assert_eq!(rl.remaining, 0);
    }

    #[tokio::test]
    async fn not_found_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let client = client(&server).await;
        let url = client.endpoint("repos/o/missing", &[]).unwrap();
        let result = client.get_json::<serde_json::Value>(&url, &Validators::default()).await;
        assert!(matches!(result, ApiResult::NotFound(None)));
    }

    #[tokio::test]
    async fn graphql_errors_without_data_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": null,
                "errors": [{"message": "Field 'bogus' doesn't exist"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let result = client.graphql::<serde_json::Value>("query { bogus }", serde_json::json!({})).await;
        let ApiResult::Failed(e, _) = result else {
            panic!("expected failure");
        };
        assert!(e.to_string().contains("bogus"));
    }

    #[tokio::test]
    async fn graphql_returns_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"viewer": {"login": "octocat"}}
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let ApiResult::Success(data, _) = client.graphql::<serde_json::Value>("query { viewer { login } }", serde_json::json!({})).await
        else {
            panic!("expected success");
        };
        assert_eq!(data["viewer"]["login"], "octocat");
    }
}
