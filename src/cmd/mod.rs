//! Command-line entry points.

pub mod check;
pub mod schema;
pub mod translate;
