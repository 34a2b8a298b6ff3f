//! Shared request quota for every concurrent worker of a run.
//!
//! The upstream API grants its quota per credential, so a single [`RateBudget`] is created by the
//! [`Collector`](super::Collector) and handed by reference to every source. Sources call
//! [`RateBudget::check_and_wait`] before each request and feed the rate-limit headers of each
//! response back through [`RateBudget::record`].
//!
//! Waiting is advisory back-pressure: workers that all observe a healthy counter at the same time
//! may still issue a small burst before the next response corrects it.

use chrono::{DateTime, Utc};
use core::time::Duration;
use reqwest::header::HeaderMap;
use std::sync::Mutex;

const LOG_TARGET: &str = "    budget";

/// Optimistic starting quota, matching the upstream's authenticated hourly allowance.
pub const DEFAULT_REMAINING: u64 = 5000;

pub const DEFAULT_THRESHOLD: u64 = 100;

pub const DEFAULT_RESET_BUFFER: Duration = Duration::from_secs(5);

/// Upper bound on a single wait, whatever the upstream reports.
const MAX_WAIT: Duration = Duration::from_hours(1);

/// Rate limit information from response headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitInfo {
    /// Parse `x-ratelimit-remaining` and `x-ratelimit-reset`. Either one missing or malformed yields `None`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?.trim().parse::<u64>().ok()?;
        let reset_timestamp = headers.get("x-ratelimit-reset")?.to_str().ok()?.trim().parse::<i64>().ok()?;
        let reset_at = DateTime::from_timestamp(reset_timestamp, 0)?;

        Some(Self { remaining, reset_at })
    }
}

/// Point-in-time copy of the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateState {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub threshold: u64,
}

#[derive(Debug)]
pub struct RateBudget {
    state: Mutex<RateLimitInfo>,
    threshold: u64,
    reset_buffer: Duration,
}

impl RateBudget {
    /// Create a budget with optimistic defaults: full quota, resetting now.
    #[must_use]
    pub fn new(threshold: u64, reset_buffer: Duration) -> Self {
        Self::with_state(
            RateLimitInfo {
                remaining: DEFAULT_REMAINING,
                reset_at: Utc::now(),
            },
            threshold,
            reset_buffer,
        )
    }

    #[must_use]
    pub const fn with_state(initial: RateLimitInfo, threshold: u64, reset_buffer: Duration) -> Self {
        Self {
            state: Mutex::new(initial),
            threshold,
            reset_buffer,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> RateState {
        let state = *self.state.lock().expect("lock not poisoned");
        RateState {
            remaining: state.remaining,
            reset_at: state.reset_at,
            threshold: self.threshold,
        }
    }

    /// Overwrite the counter with the latest observation. `None` leaves the state untouched.
    pub fn record(&self, info: Option<RateLimitInfo>) {
        if let Some(info) = info {
            *self.state.lock().expect("lock not poisoned") = info;
        }
    }

    /// Overwrite the counter from raw response headers; missing or malformed headers are ignored.
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        self.record(RateLimitInfo::from_headers(headers));
    }

    /// How long a caller must wait before issuing a request at `now`, if at all.
    #[must_use]
    pub fn required_wait(&self, now: DateTime<Utc>) -> Option<Duration> {
        let state = *self.state.lock().expect("lock not poisoned");
        if state.remaining > self.threshold || state.reset_at <= now {
            return None;
        }

        let until_reset = (state.reset_at - now).to_std().unwrap_or(Duration::ZERO);
        Some((until_reset + self.reset_buffer).min(MAX_WAIT))
    }

    /// Return immediately while quota is above the threshold or the reset time has passed;
    /// otherwise sleep until the reset time plus the configured buffer.
    pub async fn check_and_wait(&self) {
        let now = Utc::now();
        let Some(wait) = self.required_wait(now) else {
            return;
        };

        let resume_at = now + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero());
        log::warn!(
            target: LOG_TARGET,
            "Rate limit nearly exhausted ({} remaining), waiting until {}",
            self.snapshot().remaining,
            resume_at.with_timezone(&chrono::Local).format("%T")
        );

        tokio::time::sleep(wait).await;
        log::info!(target: LOG_TARGET, "Rate limit window reset, resuming requests");
    }
}

impl Default for RateBudget {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_RESET_BUFFER)
    }
}
