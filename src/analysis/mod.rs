//! Dashboard analysis.
//!
//! KPI computations over the documents held by the search index.

pub mod kpi;

pub use kpi::*;
