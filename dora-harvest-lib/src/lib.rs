#![doc(hidden)]

//! Core library for dora-harvest
//!
//! This library holds all functionality of the dora-harvest tool, which collects deployment
//! and pull request telemetry from GitHub repositories for delivery performance reporting.
//!
//! # Module Organization
//!
//! - [`collection`]: Fetching, filtering, and persisting per-repository telemetry
//! - [`commands`]: Command-line interface and orchestration

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub mod collection;

#[cfg(any(debug_assertions, test))]
pub mod commands;
#[cfg(not(any(debug_assertions, test)))]
mod commands;

pub use crate::commands::{Host, run};
