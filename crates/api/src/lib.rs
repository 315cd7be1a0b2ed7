//! Service layer for the Tracklab experiment-tracking server.
//!
//! The HTTP collaborator decodes requests into the types in [`request`],
//! invokes the services, and renders [`response`] values or the
//! [`error::ApiError`] envelope. Dashboard search endpoints stream the
//! binary tree format in [`encoding`].

pub mod encoding;
pub mod error;
pub mod request;
pub mod response;
pub mod services;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use services::{ArtifactService, DashboardService, ExperimentService, RunService};
