//! Pizza Telemetry - in-process metrics aggregation and push export
//!
//! Request handlers report through a [`Tracker`]; a background
//! [`Scheduler`] periodically drains the shared [`CounterStore`] and pushes
//! one OTLP/JSON payload per metric to the configured collector.

pub mod config;
pub mod error;
pub mod export;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod tracking;
pub mod util;

pub use config::Config;
pub use error::ExportError;
pub use export::{Encoder, ExportOutcome, HttpExporter, MetricExporter};
pub use sampler::{HostSampler, ResourceSampler};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::CounterStore;
pub use tracking::Tracker;

/// Crate version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
