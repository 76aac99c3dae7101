//! Metric encoding and delivery to the remote collector

mod encoder;
mod exporter;

pub use encoder::*;
pub use exporter::{ExportOutcome, HttpExporter, HttpExporterConfig, MetricExporter};
