//! Streaming batch aggregation.
//!
//! A [`BatchAggregator`] sits between the message consumer and the
//! downstream bulk writes. Each domain owns one instance with its own
//! thresholds and [`BatchSink`].

pub mod aggregator;
pub mod sink;

pub use aggregator::{BatchAggregator, BatchConfig};
pub use sink::{BatchSink, SinkFuture};

use thiserror::Error;

/// Errors raised while constructing an aggregator.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Thresholds that could never trigger a flush.
    #[error("invalid batch configuration: {0}")]
    InvalidConfig(String),

    /// The window timer needs a tokio runtime to spawn on.
    #[error("batch aggregator must be created inside a tokio runtime")]
    NoRuntime,
}
