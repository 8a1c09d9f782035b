//! Process supervisor for fleets of long-running data-service processes.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// Test dependencies are only used in test code
#[cfg(test)]
use assert_cmd as _;
use ctrlc as _;
#[cfg(test)]
use predicates as _;
use serde_json as _;
use strum as _;
use tracing_subscriber as _;

/// CLI parsing.
pub mod cli;

/// Config loading and evaluation.
pub mod config;

/// Errors.
pub mod error;

/// Port expression evaluation.
pub mod expr;

/// Application log discovery and display.
pub mod logs;

/// Batch orchestration of lifecycle operations.
pub mod manager;

/// Startup-order planning.
pub mod plan;

/// Process records and lifecycle operations.
pub mod process;

/// Selector resolution.
pub mod selector;

/// Status persistence.
pub mod store;

/// OS adapter.
pub mod sys;
