//! Retry and timeout middleware for outbound API requests.
//!
//! Wraps each request with [`seatbelt`] retry and timeout layers so that transient failures
//! (network errors and 5xx responses) are masked. Rate-limited responses are not retried here:
//! they reach the caller, which pauses through the shared [`RateBudget`](super::RateBudget).

use core::time::Duration;
use layered::{Execute, Service, Stack};
use ohno::app_err;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder, Response};
use seatbelt::retry::{Backoff, Retry};
use seatbelt::timeout::Timeout;
use seatbelt::{RecoveryInfo, ResilienceContext};
use tick::Clock;
use url::Url;

const LOG_TARGET: &str = "      http";

/// Timeout applied to every individual attempt.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Retry policy handed to the retry layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries on top of the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry; later retries back off exponentially.
    pub base_delay: Duration,
    pub request_timeout: Duration,
}

impl RetryConfig {
    /// 3 retries starting at 1s.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        base_delay: Duration::from_secs(1),
        request_timeout: DEFAULT_REQUEST_TIMEOUT,
    };

    /// Single attempt, no retries.
    pub const NONE: Self = Self {
        max_retries: 0,
        ..Self::DEFAULT
    };
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Everything needed to rebuild a request for each attempt.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    json: Option<serde_json::Value>,
}

impl OutgoingRequest {
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            json: None,
        }
    }

    #[must_use]
    pub fn post_json(url: Url, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            json: Some(body),
        }
    }

    /// Add a header; values that are not valid header text are dropped with a debug log.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                let _ = self.headers.insert(name, value);
            }
            Err(e) => log::debug!(target: LOG_TARGET, "Dropping header '{name}' with unusable value: {e}"),
        }
        self
    }

    fn into_builder(self, client: &reqwest::Client) -> RequestBuilder {
        let builder = client.request(self.method, self.url).headers(self.headers);
        match self.json {
            Some(body) => builder.json(&body),
            None => builder,
        }
    }
}

/// Network errors and server errors are transient; every other response goes back to the caller.
fn should_retry_response(result: &crate::Result<Response>) -> RecoveryInfo {
    match result {
        Err(_) => RecoveryInfo::retry(),
        Ok(resp) if resp.status().is_server_error() => RecoveryInfo::retry(),
        Ok(_) => RecoveryInfo::never(),
    }
}

/// Send `request` with automatic retry and a per-attempt timeout.
///
/// After the last attempt the final response is returned unchanged, so a persistent 5xx is
/// classified by the caller like any other response.
pub async fn resilient_send(client: &reqwest::Client, config: RetryConfig, request: OutgoingRequest) -> crate::Result<Response> {
    let clock = Clock::new_tokio();
    let context = ResilienceContext::new(&clock).name("github_api");

    let client = client.clone();
    let service = (
        Retry::layer("retry", &context)
            .clone_input()
            .recovery_with(|result: &crate::Result<Response>, _| should_retry_response(result))
            .max_retry_attempts(config.max_retries)
            .base_delay(config.base_delay)
            .backoff(Backoff::Exponential)
            .on_retry(|_output, args| {
                log::debug!(
                    target: LOG_TARGET,
                    "Retrying API request (attempt {}, delay {}ms)",
                    args.attempt().index() + 1,
                    args.retry_delay().as_millis(),
                );
            }),
        Timeout::layer("timeout", &context)
            .timeout_error(|_| app_err!("HTTP request timed out"))
            .timeout(config.request_timeout),
        Execute::new(move |request: OutgoingRequest| {
            let builder = request.into_builder(&client);
            async move { builder.send().await.map_err(ohno::AppError::from) }
        }),
    )
        .into_service();

    service.execute(request).await
}
