//! Delivery telemetry collection for GitHub repositories
//!
//! This module gathers deployment-like events and merged pull requests for a batch of
//! repositories over a time window, and writes them to disk as per-repository JSON artifacts
//! for downstream aggregation.
//!
//! # Implementation Model
//!
//! Each repository is configured with a [`RepoConfig`] naming one of three event sources:
//! - **Actions**: successful, completed workflow runs, optionally narrowed by workflow,
//!   keywords, trigger events, and branch
//! - **Deployments**: deployment records with their latest status, via GraphQL by default or the
//!   REST listing on request
//! - **Releases**: published releases, optionally narrowed by tag pattern
//!
//! Every source produces [`DeploymentLikeEvent`]s. Merged pull requests into the default branch
//! are collected alongside, with bot-authored ones split out by the [`BotClassifier`].
//!
//! All requests share one [`RateBudget`], which tracks the quota reported by the API and pauses
//! callers when it runs low. Requests themselves go through a retrying transport, and classify
//! their outcome as an [`ApiResult`] carrying the observed rate limit rather than reporting it
//! through callbacks.
//!
//! The [`Collector`] runs a bounded number of repositories at once. A failing repository is
//! logged and reported with zero counts; it never aborts the batch. Results come back in input
//! order. Artifacts already collected for the same window are reused, metadata is revalidated
//! with conditional requests, and a [`RunManifest`] records each repository's progress so an
//! interrupted run can resume.

pub mod artifacts;
pub mod bot_classifier;
pub mod client;
mod collector;
pub mod conditional_cache;
mod event;
pub mod manifest;
mod metadata;
mod path_utils;
mod progress;
mod pull_request;
pub mod rate_budget;
mod repo_config;
mod repo_result;
pub mod resilient_http;
pub mod sources;
mod window;

pub use artifacts::ArtifactStore;
pub use bot_classifier::{BotClassifier, DEFAULT_BOT_PATTERNS, is_bot};
pub use client::{ApiResult, Client, DEFAULT_API_URL};
pub use collector::{Collector, CollectorOptions, DEFAULT_CONCURRENCY};
pub use event::{DeploymentLikeEvent, EventSource};
pub use manifest::{RepoState, RunManifest};
pub use metadata::RepoMetadata;
pub use path_utils::sanitize_path_component;
pub use progress::{NoProgress, Progress};
pub use pull_request::{ExcludedBot, PullRequestRecord, PullRequestSet};
pub use rate_budget::RateBudget;
pub use repo_config::{ActionsOptions, CollectionMethod, DeploymentsOptions, ReleasesOptions, RepoConfig};
pub use repo_result::{RepoCollectionResult, RepoOutcome};
pub use resilient_http::RetryConfig;
pub use window::CollectionWindow;
