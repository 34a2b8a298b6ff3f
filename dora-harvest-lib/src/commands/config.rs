use crate::Result;
use crate::collection::RepoConfig;
use core::time::Duration;
use directories::ProjectDirs;
use ohno::{IntoAppError, app_err};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "    config";

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

pub const CONFIG_FILE_NAME: &str = "harvest.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of repositories collected at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory receiving the per-repository artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Base URL of the REST API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Remaining quota at or below which requests wait for the reset
    #[serde(default = "default_rate_limit_threshold")]
    pub rate_limit_threshold: u64,

    /// Extra time waited past the quota reset
    #[serde(default = "default_rate_limit_buffer", with = "humantime_serde")]
    pub rate_limit_buffer: Duration,

    /// Login fragments identifying automation accounts
    #[serde(default = "default_bot_patterns")]
    pub bot_patterns: Vec<String>,

    #[serde(default)]
    pub include_bot_prs: bool,

    #[serde(default)]
    pub force_rest_deployments: bool,

    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

const fn default_concurrency() -> usize {
    crate::collection::DEFAULT_CONCURRENCY
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("harvest-data")
}

fn default_api_url() -> String {
    crate::collection::DEFAULT_API_URL.to_string()
}

const fn default_rate_limit_threshold() -> u64 {
    crate::collection::rate_budget::DEFAULT_THRESHOLD
}

const fn default_rate_limit_buffer() -> Duration {
    crate::collection::rate_budget::DEFAULT_RESET_BUFFER
}

fn default_bot_patterns() -> Vec<String> {
    crate::collection::DEFAULT_BOT_PATTERNS.iter().map(ToString::to_string).collect()
}

impl Config {
    /// Load configuration from a file, falling back to defaults when no file exists
    ///
    /// Without an explicit path, `harvest.toml` is looked up in `base_dir` and then in the
    /// user's configuration directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the result fails validation
    pub fn load(base_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let found = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration file '{}'", path.display()))?;
            Some((path.to_path_buf(), text))
        } else {
            find_config(base_dir)?
        };

        let mut config = match found {
            Some((path, text)) => {
                log::debug!(target: LOG_TARGET, "Using configuration file '{}'", path.display());
                toml::from_str::<Self>(&text).into_app_err_with(|| format!("parsing configuration file '{}'", path.display()))?
            }
            None => {
                log::debug!(target: LOG_TARGET, "No configuration file found, using defaults");
                Self::default()
            }
        };

        config.dedup_repos();
        config.validate()?;

        Ok(config)
    }

    /// Keep the first of several repositories sharing a lower-cased slug.
    fn dedup_repos(&mut self) {
        let mut seen = HashSet::new();
        self.repos.retain(|repo| {
            let first = seen.insert(repo.key());
            if !first {
                log::warn!(target: LOG_TARGET, "Repository '{repo}' is listed more than once, keeping the first entry");
            }
            first
        });
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error if concurrency is zero or no repositories are configured
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(app_err!("concurrency must be at least 1"));
        }

        if self.repos.is_empty() {
            return Err(app_err!("no repositories configured; add at least one [[repos]] entry"));
        }

        Ok(())
    }

    /// Number of configured repositories per collection method.
    #[must_use]
    pub fn repos_per_method(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for repo in &self.repos {
            *counts.entry(repo.method().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

fn find_config(base_dir: &Path) -> Result<Option<(PathBuf, String)>> {
    let user_config = ProjectDirs::from("", "", "dora-harvest").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME));

    for path in core::iter::once(base_dir.join(CONFIG_FILE_NAME)).chain(user_config) {
        match fs::read_to_string(&path) {
            Ok(text) => return Ok(Some((path, text))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration file '{}'", path.display())),
        }
    }

    Ok(None)
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}
