//! Core domain vocabulary for Tracklab.
//!
//! This crate carries the pieces every other crate needs:
//! - run identifier generation and validation
//! - configuration types supplied by the host process
//! - the shared core error type

pub mod config;
pub mod error;
pub mod id;

pub use error::{Error, Result};

/// Reserved tag key carrying a run's display name, kept wire-compatible
/// with MLflow clients.
pub const TAG_RUN_NAME: &str = "mlflow.runName";

/// Default page size for run search when the request leaves max_results unset.
pub const DEFAULT_SEARCH_MAX_RESULTS: i64 = 1000;

/// Upper bound on max_results for run search.
pub const SEARCH_MAX_RESULTS_LIMIT: i64 = 50_000;
