//! Error types for the export path
//!
//! None of these ever reach the instrumented application: the scheduler logs
//! them and moves on to the next metric.

use thiserror::Error;

/// Failures while turning a metric into a request or delivering it
#[derive(Error, Debug)]
pub enum ExportError {
    /// Payload could not be serialized
    #[error("failed to encode metric {metric}: {source}")]
    Encoding {
        metric: String,
        #[source]
        source: serde_json::Error,
    },

    /// Collector answered with a non-success status
    #[error("collector rejected metric with status {status}")]
    Rejected { status: u16 },

    /// Network, DNS or timeout failure
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// Exporter panicked while handling the metric
    #[error("exporter panicked: {0}")]
    Panicked(String),
}
