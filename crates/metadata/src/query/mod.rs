//! Query compilation: request-level filter languages lowered to SQL.
//!
//! Two front ends share one back end:
//! - [`filter`] compiles the tracking API's flat `entity.key OP value`
//!   grammar,
//! - [`expr`] compiles the dashboard API's Python-subset expression
//!   language.
//!
//! Both produce fragments against [`select::Select`], which renders a single
//! SQL statement plus an ordered bind list for the configured [`Dialect`].

pub mod expr;
pub mod filter;
pub mod select;

pub use select::{Bind, Dialect, Fragment, Select};
