use super::Host;
use super::ProgressReporter;
use super::common::{ColorMode, LogLevel, init_logging};
use super::config::Config;
use crate::Result;
use crate::collection::{
    BotClassifier, Client, CollectionWindow, Collector, CollectorOptions, RateBudget, RepoCollectionResult, RepoOutcome,
};
use chrono::{DateTime, Utc};
use clap::Args;
use core::time::Duration;
use ohno::bail;
use owo_colors::OwoColorize;
use std::io::{self, Write, stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_TARGET: &str = "   collect";

/// Days covered when no explicit window is given.
pub const DEFAULT_DAYS: u32 = 90;

const PROGRESS_DELAY: Duration = Duration::from_millis(300);

#[derive(Args, Debug, Default)]
pub struct CollectArgs {
    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Path to configuration file (default is `harvest.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Window start, as an RFC 3339 timestamp or a YYYY-MM-DD date
    #[arg(long, value_name = "WHEN", requires = "end", conflicts_with = "days", help_heading = "Window")]
    pub start: Option<String>,

    /// Window end, as an RFC 3339 timestamp or a YYYY-MM-DD date
    #[arg(long, value_name = "WHEN", requires = "start", conflicts_with = "days", help_heading = "Window")]
    pub end: Option<String>,

    /// Collect the N days leading up to now [default: 90]
    #[arg(long, value_name = "N", help_heading = "Window")]
    pub days: Option<u32>,

    /// Number of repositories collected at once
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Directory receiving the collected artifacts
    #[arg(long, value_name = "PATH")]
    pub output_dir: Option<PathBuf>,

    /// Ignore stored artifacts and metadata, fetching everything again
    #[arg(long)]
    pub refresh: bool,

    /// Skip repositories the previous run for the same window already finished
    #[arg(long)]
    pub resume: bool,

    /// Use the REST deployments listing instead of GraphQL
    #[arg(long)]
    pub force_rest_deployments: bool,

    /// Keep bot-authored pull requests in the pull request list
    #[arg(long)]
    pub include_bot_prs: bool,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none")]
    pub log_level: LogLevel,
}

/// Collect every configured repository and print a summary table.
///
/// # Errors
///
/// Returns an error when a precondition fails before collection starts: no token, an invalid
/// configuration, or an invalid window. Failures of individual repositories are reported in the
/// summary instead.
pub async fn process_collect<H: Host>(host: &mut H, args: &CollectArgs) -> Result<()> {
    init_logging(args.log_level);

    let config = Config::load(Path::new("."), args.config.as_deref())?;

    let Some(token) = args.github_token.as_deref().filter(|t| !t.trim().is_empty()) else {
        bail!("a GitHub token is required; pass --github-token or set GITHUB_TOKEN");
    };

    let window = resolve_window(args, Utc::now())?;

    let concurrency = args.concurrency.unwrap_or(config.concurrency);
    if concurrency == 0 {
        bail!("concurrency must be at least 1");
    }

    let output_dir = args.output_dir.clone().unwrap_or_else(|| config.output_dir.clone());

    let client = Client::new(token, &config.api_url)?;
    let budget = Arc::new(RateBudget::new(config.rate_limit_threshold, config.rate_limit_buffer));
    let progress = Arc::new(ProgressReporter::new(
        PROGRESS_DELAY,
        args.color.use_colors(&io::stderr()),
        args.log_level != LogLevel::None,
    ));

    let options = CollectorOptions {
        concurrency,
        force_refresh: args.refresh,
        resume: args.resume,
        force_rest_deployments: args.force_rest_deployments || config.force_rest_deployments,
        include_bot_prs: args.include_bot_prs || config.include_bot_prs,
        bot_classifier: BotClassifier::new(&config.bot_patterns),
    };

    log::info!(
        target: LOG_TARGET,
        "Collecting {} repositories over {window} into '{}'",
        config.repos.len(),
        output_dir.display()
    );

    let collector = Collector::new(client, budget, output_dir, options, progress);
    let results = collector.collect(&config.repos, &window).await;

    let use_colors = args.color.use_colors(&stdout());
    let _ = write_summary(&mut host.output(), &results, use_colors);

    let failed: Vec<_> = results.iter().filter(|r| r.is_failed()).collect();
    if !failed.is_empty() {
        let mut error = host.error();
        let _ = writeln!(error, "\nUnable to collect {} of {} repositories", failed.len(), results.len());
        for result in failed {
            if let RepoOutcome::Failed(reason) = &result.outcome {
                let _ = writeln!(error, "  {}: {reason}", result.repo);
            }
        }
    }

    Ok(())
}

/// The window selected by `--start`/`--end`, or the `--days` (default 90) whole days ending today.
fn resolve_window(args: &CollectArgs, now: DateTime<Utc>) -> Result<CollectionWindow> {
    match (&args.start, &args.end) {
        (Some(start), Some(end)) => CollectionWindow::parse(start, end),
        (None, None) => CollectionWindow::last_days(args.days.unwrap_or(DEFAULT_DAYS), now),
        _ => bail!("--start and --end must be given together"),
    }
}

const HEADERS: [&str; 6] = ["Repository", "Method", "Events", "Pull requests", "Cached", "Status"];

/// Write one row per repository, in input order.
pub fn write_summary<W: Write>(writer: &mut W, results: &[RepoCollectionResult], use_colors: bool) -> io::Result<()> {
    let rows: Vec<[String; 6]> = results
        .iter()
        .map(|r| {
            [
                r.repo.clone(),
                r.method.to_string(),
                r.deployment_event_count.to_string(),
                r.pull_request_count.to_string(),
                if r.cached { "yes" } else { "no" }.to_string(),
                status_label(&r.outcome).to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let header = format_row(&HEADERS.map(String::from), &widths);
    if use_colors {
        writeln!(writer, "{}", header.bold())?;
    } else {
        writeln!(writer, "{header}")?;
    }

    for (row, result) in rows.iter().zip(results) {
        let line = format_row(row, &widths);
        if !use_colors {
            writeln!(writer, "{line}")?;
            continue;
        }

        match result.outcome {
            RepoOutcome::Failed(_) => writeln!(writer, "{}", line.red())?,
            RepoOutcome::Collected => writeln!(writer, "{}", line.green())?,
            RepoOutcome::Reused | RepoOutcome::Resumed => writeln!(writer, "{line}")?,
        }
    }

    Ok(())
}

const fn status_label(outcome: &RepoOutcome) -> &'static str {
    match outcome {
        RepoOutcome::Collected => "collected",
        RepoOutcome::Reused => "reused",
        RepoOutcome::Resumed => "resumed",
        RepoOutcome::Failed(_) => "failed",
    }
}

/// Text columns are left-aligned, counts right-aligned.
fn format_row(cells: &[String; 6], widths: &[usize; 6]) -> String {
    let mut line = String::new();
    for (index, (cell, &width)) in cells.iter().zip(widths).enumerate() {
        if index > 0 {
            line.push_str("  ");
        }
        if matches!(index, 2 | 3) {
            line.push_str(&format!("{cell:>width$}"));
        } else {
            line.push_str(&format!("{cell:<width$}"));
        }
    }
    line.trim_end().to_string()
}
