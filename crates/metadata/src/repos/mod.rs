//! Repository traits for metadata operations.

pub mod dashboards;
pub mod experiments;
pub mod import;
pub mod metrics;
pub mod params;
pub mod runs;
pub mod search;
pub mod tags;

pub use dashboards::DashboardRepo;
pub use experiments::ExperimentRepo;
pub use import::ImportRepo;
pub use metrics::MetricRepo;
pub use params::ParamRepo;
pub use runs::{RunRepo, RunUpdate};
pub use search::{AlignRequest, SearchRepo};
pub use tags::TagRepo;
