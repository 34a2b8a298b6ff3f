//! Command-line interface and orchestration for dora-harvest
//!
//! This module implements the CLI commands on top of the [`collection`](crate::collection)
//! engine. It handles argument parsing, configuration loading, logging setup, progress
//! reporting, and the summary written once a run completes.
//!
//! # Commands
//!
//! - **collect**: Load the configuration, check the preconditions (token, repositories,
//!   window), run one collection, and print a per-repository summary table
//! - **validate**: Check the configuration file and report the repositories per method
//!
//! The `run` function parses command-line arguments using clap and routes to the command
//! handler. All terminal output goes through a [`Host`] so the commands can be tested
//! without a real terminal.
//!
//! Configuration is a TOML file (`harvest.toml` by default) listing the repositories to
//! collect and the run-wide settings; command-line flags override the file.

mod collect;
mod common;
mod config;
mod host;
mod progress_reporter;
mod run;
mod validate;

pub use collect::{CollectArgs, process_collect, write_summary};
pub use common::{ColorMode, LogLevel};
pub use config::Config;
pub use host::Host;
pub use progress_reporter::ProgressReporter;
pub use run::run;
pub use validate::{ValidateArgs, validate_config};
