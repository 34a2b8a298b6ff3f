use super::artifacts::{ArtifactStore, EventsArtifact, MetadataArtifact, PullRequestsArtifact};
use super::bot_classifier::BotClassifier;
use super::client::Client;
use super::conditional_cache::{ResponseSource, revalidate};
use super::manifest::{RepoState, RunManifest};
use super::metadata::RepoMetadata;
use super::progress::Progress;
use super::rate_budget::RateBudget;
use super::repo_config::RepoConfig;
use super::repo_result::{RepoCollectionResult, RepoOutcome};
use super::sources::pull_requests::BotPolicy;
use super::sources::{self, SourceContext};
use super::window::CollectionWindow;
use crate::Result;
use chrono::Utc;
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const LOG_TARGET: &str = " collector";

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Run-wide knobs of a collection.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    /// Number of repositories processed at once. Zero is treated as one.
    pub concurrency: usize,

    /// Ignore stored artifacts and metadata validators.
    pub force_refresh: bool,

    /// Skip repositories the stored run manifest records as done for the same window.
    pub resume: bool,

    /// Use the REST deployments listing for every deployments repository.
    pub force_rest_deployments: bool,

    /// Keep bot-authored pull requests in the main list.
    pub include_bot_prs: bool,
    pub bot_classifier: BotClassifier,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            force_refresh: false,
            resume: false,
            force_rest_deployments: false,
            include_bot_prs: false,
            bot_classifier: BotClassifier::default(),
        }
    }
}

/// Collects events and pull requests for a batch of repositories.
pub struct Collector {
    client: Client,
    budget: Arc<RateBudget>,
    store: ArtifactStore,
    options: CollectorOptions,
    progress: Arc<dyn Progress>,
}

impl core::fmt::Debug for Collector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collector")
            .field("client", &self.client)
            .field("budget", &self.budget)
            .field("store", &self.store)
            .field("options", &self.options)
            .field("progress", &"<dyn Progress>")
            .finish()
    }
}

/// Per-run state shared by every worker.
struct Run<'a> {
    window: &'a CollectionWindow,
    manifest: Mutex<RunManifest>,
    completed: Arc<AtomicU64>,
}

impl Run<'_> {
    fn update(&self, f: impl FnOnce(&mut RunManifest)) {
        f(&mut self.manifest.lock().expect("lock not poisoned"));
    }

    fn transition(&self, repo: &RepoConfig, state: RepoState) {
        self.update(|m| m.transition(&repo.key(), repo.slug(), state, Utc::now()));
    }
}

impl Collector {
    pub fn new(
        client: Client,
        budget: Arc<RateBudget>,
        output_dir: impl Into<PathBuf>,
        options: CollectorOptions,
        progress: Arc<dyn Progress>,
    ) -> Self {
        Self {
            client,
            budget,
            store: ArtifactStore::new(output_dir),
            options,
            progress,
        }
    }

    /// Collect every repository, returning one result per input in input order.
    ///
    /// Individual repository failures are logged and reported as zero-valued results; they never
    /// abort the batch.
    pub async fn collect(&self, repos: &[RepoConfig], window: &CollectionWindow) -> Vec<RepoCollectionResult> {
        if repos.is_empty() {
            return Vec::new();
        }

        let manifest = self
            .options
            .resume
            .then(|| RunManifest::load_for(self.store.root(), window))
            .flatten()
            .unwrap_or_else(|| RunManifest::new(*window, Utc::now()));

        let run = Run {
            window,
            manifest: Mutex::new(manifest),
            completed: Arc::new(AtomicU64::new(0)),
        };

        self.progress.set_phase("Collecting");
        let total = repos.len() as u64;
        let completed = Arc::clone(&run.completed);
        self.progress.set_determinate(Box::new(move || {
            let done = completed.load(Ordering::Relaxed);
            (total, done, format!("{done}/{total} repositories"))
        }));

        let next = AtomicUsize::new(0);
        let workers = self.options.concurrency.clamp(1, repos.len());
        let worker_results = join_all((0..workers).map(|_| self.worker(repos, &next, &run))).await;

        self.progress.done();

        let mut results: Vec<Option<RepoCollectionResult>> = vec![None; repos.len()];
        for (index, result) in worker_results.into_iter().flatten() {
            results[index] = Some(result);
        }

        results
            .into_iter()
            .zip(repos)
            .map(|(result, repo)| result.unwrap_or_else(|| RepoCollectionResult::failed(repo, self.cached(), "not processed".to_string())))
            .collect()
    }

    /// Pull repository indices until the shared counter runs past the end.
    async fn worker(&self, repos: &[RepoConfig], next: &AtomicUsize, run: &Run<'_>) -> Vec<(usize, RepoCollectionResult)> {
        let mut results = Vec::new();
        loop {
            let index = next.fetch_add(1, Ordering::Relaxed);
            let Some(repo) = repos.get(index) else {
                return results;
            };

            let result = self.collect_repo(repo, run).await;
            let _ = run.completed.fetch_add(1, Ordering::Relaxed);
            results.push((index, result));
        }
    }

    async fn collect_repo(&self, repo: &RepoConfig, run: &Run<'_>) -> RepoCollectionResult {
        let key = repo.key();

        if let Some(result) = self.resumed(repo, &key, run) {
            return result;
        }

        run.transition(repo, RepoState::Pending);
        let result = match self.try_collect_repo(repo, run).await {
            Ok(result) => {
                run.update(|m| {
                    m.complete(&key, repo.slug(), result.deployment_event_count, result.pull_request_count, Utc::now());
                });
                result
            }
            Err(e) => {
                log::error!(target: LOG_TARGET, "Could not collect '{repo}': {e:#}");
                self.progress.println(&format!("Could not collect '{repo}': {e}"));
                run.update(|m| m.fail(&key, repo.slug(), format!("{e:#}"), Utc::now()));
                RepoCollectionResult::failed(repo, self.cached(), format!("{e}"))
            }
        };

        self.persist_manifest(run);
        result
    }

    /// A result taken from the resumed manifest, when it records `repo` as done.
    fn resumed(&self, repo: &RepoConfig, key: &str, run: &Run<'_>) -> Option<RepoCollectionResult> {
        if !self.options.resume {
            return None;
        }

        let manifest = run.manifest.lock().expect("lock not poisoned");
        let entry = manifest.entry(key).filter(|e| e.state == RepoState::Done)?;
        log::info!(target: LOG_TARGET, "{repo}: already done in the resumed run, skipping");

        Some(RepoCollectionResult::new(
            repo,
            entry.deployment_event_count,
            entry.pull_request_count,
            self.cached(),
            RepoOutcome::Resumed,
        ))
    }

    async fn try_collect_repo(&self, repo: &RepoConfig, run: &Run<'_>) -> Result<RepoCollectionResult> {
        let (metadata, fresh_metadata) = self.fetch_metadata(repo, run.window).await?;
        run.transition(repo, RepoState::MetadataFetched);

        if !self.options.force_refresh
            && let Some((events, pull_requests)) = self.store.load_collected(repo, run.window)
        {
            log::info!(target: LOG_TARGET, "{repo}: reusing artifacts already collected for this window");
            if let Some(artifact) = &fresh_metadata {
                self.store.save_metadata(repo, artifact)?;
            }
            return Ok(RepoCollectionResult::new(
                repo,
                events.events.len(),
                pull_requests.pull_requests.len(),
                self.cached(),
                RepoOutcome::Reused,
            ));
        }

        let ctx = SourceContext {
            client: &self.client,
            budget: &self.budget,
            window: run.window,
        };

        let events = sources::collect_events(ctx, repo, self.options.force_rest_deployments).await?;
        run.transition(repo, RepoState::EventsCollected);

        let bots = BotPolicy {
            classifier: &self.options.bot_classifier,
            include_bots: self.options.include_bot_prs,
        };
        let pull_requests = sources::pull_requests::collect(ctx, repo, &metadata.default_branch, bots).await?;
        run.transition(repo, RepoState::PullRequestsCollected);

        let fetched_at = Utc::now();
        let events = EventsArtifact {
            fetched_at,
            window: *run.window,
            repo: repo.slug().to_string(),
            method: repo.method(),
            events,
        };
        let pull_requests = PullRequestsArtifact {
            fetched_at,
            window: *run.window,
            repo: repo.slug().to_string(),
            base_branch: metadata.default_branch,
            pull_requests: pull_requests.pull_requests,
            excluded_bots: pull_requests.excluded_bots,
        };

        // Nothing touches the disk until both collections succeeded.
        if let Some(artifact) = &fresh_metadata {
            self.store.save_metadata(repo, artifact)?;
        }
        self.store.save_collected(repo, &events, &pull_requests)?;

        Ok(RepoCollectionResult::new(
            repo,
            events.events.len(),
            pull_requests.pull_requests.len(),
            self.cached(),
            RepoOutcome::Collected,
        ))
    }

    /// Revalidate the stored metadata snapshot.
    ///
    /// Returns the metadata plus, when upstream sent a fresh copy, the artifact to write once the
    /// repository has been collected. A 304 yields no artifact so the stored file stays untouched.
    async fn fetch_metadata(&self, repo: &RepoConfig, window: &CollectionWindow) -> Result<(RepoMetadata, Option<MetadataArtifact>)> {
        let cached = if self.options.force_refresh {
            None
        } else {
            self.store.load_metadata(repo).map(MetadataArtifact::into_cached)
        };

        let url = self.client.endpoint(&format!("repos/{}/{}", repo.owner(), repo.name()), &[])?;
        let url = &url;
        let client = &self.client;

        let revalidated = sources::execute(&self.budget, &format!("metadata of {repo}"), || {
            revalidate(cached.clone(), |validators| async move { client.get_json::<RepoMetadata>(url, &validators).await })
        })
        .await?;

        log::debug!(target: LOG_TARGET, "{repo}: metadata served from {}", revalidated.source);

        let fresh = (revalidated.source == ResponseSource::Network).then(|| {
            let response = &revalidated.response;
            MetadataArtifact {
                fetched_at: Utc::now(),
                window: *window,
                etag: response.etag.clone(),
                last_modified: response.last_modified.clone(),
                metadata: response.data.clone(),
            }
        });

        Ok((revalidated.response.data, fresh))
    }

    const fn cached(&self) -> bool {
        !self.options.force_refresh
    }

    fn persist_manifest(&self, run: &Run<'_>) {
        let manifest = run.manifest.lock().expect("lock not poisoned");
        if let Err(e) = manifest.save(self.store.root()) {
            log::warn!(target: LOG_TARGET, "Could not save run manifest: {e:#}");
        }
    }
}
