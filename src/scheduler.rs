//! Periodic flush of the counter store to the collector
//!
//! A single background task wakes every `flush_interval`, drains the store,
//! and pushes one payload per metric. Payloads of one tick go out
//! concurrently, bounded by `max_concurrent_exports`, and the whole tick is
//! bounded by one deadline. Failures are logged per metric and never stop
//! the loop.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::ExportError;
use crate::export::{
    metric_name, Encoder, ExportOutcome, MetricExporter, MetricPoint, MetricValue,
};
use crate::sampler::{ResourceSample, ResourceSampler};
use crate::store::{CounterStore, MetricSnapshot};

/// Default flush period
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of payloads in flight during one tick
pub const DEFAULT_MAX_CONCURRENT_EXPORTS: usize = 8;

/// Revenue is exported in thousandths of a currency unit
pub const REVENUE_SCALE: f64 = 1000.0;

/// Tally of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub rejected: usize,
    pub transport_failures: usize,
    pub encoding_skipped: usize,
}

impl FlushReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.rejected + self.transport_failures + self.encoding_skipped
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.delivered
    }

    fn record(&mut self, outcome: &ExportOutcome) {
        match outcome {
            ExportOutcome::Delivered { .. } => self.delivered += 1,
            ExportOutcome::Rejected { .. } => self.rejected += 1,
            ExportOutcome::TransportFailure { .. } => self.transport_failures += 1,
        }
    }
}

/// Flush pipeline wiring; consumed by [`Scheduler::spawn`]
pub struct Scheduler {
    store: Arc<CounterStore>,
    sampler: Arc<dyn ResourceSampler>,
    encoder: Encoder,
    exporter: Arc<dyn MetricExporter>,
    flush_interval: Duration,
    export_timeout: Option<Duration>,
    max_concurrent_exports: usize,
    flush_on_shutdown: bool,
}

impl Scheduler {
    pub fn new(
        store: Arc<CounterStore>,
        sampler: Arc<dyn ResourceSampler>,
        encoder: Encoder,
        exporter: Arc<dyn MetricExporter>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store,
            sampler,
            encoder,
            exporter,
            flush_interval,
            export_timeout: None,
            max_concurrent_exports: DEFAULT_MAX_CONCURRENT_EXPORTS,
            flush_on_shutdown: true,
        }
    }

    /// Bound every export call, whatever the exporter does internally
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = Some(timeout);
        self
    }

    /// Payloads in flight at once during a tick, at least 1
    pub fn with_max_concurrent_exports(mut self, limit: usize) -> Self {
        self.max_concurrent_exports = limit.max(1);
        self
    }

    /// Run one last flush when shutting down (default: on)
    pub fn with_flush_on_shutdown(mut self, enabled: bool) -> Self {
        self.flush_on_shutdown = enabled;
        self
    }

    /// Start the background task.
    ///
    /// The first flush happens one full interval after this call. Dropping
    /// the returned handle stops the task without a final flush.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let ticks = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(self.run(shutdown_rx, ticks.clone()));
        SchedulerHandle {
            shutdown_tx,
            ticks,
            task,
        }
    }

    async fn run(self, mut shutdown: broadcast::Receiver<()>, ticks: Arc<AtomicU64>) {
        info!(
            interval_secs = self.flush_interval.as_secs_f64(),
            source = self.encoder.source(),
            "Metrics scheduler started"
        );

        let mut interval =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush_once().await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
                signal = shutdown.recv() => {
                    if signal.is_ok() && self.flush_on_shutdown {
                        debug!("Running final flush");
                        self.flush_once().await;
                    }
                    break;
                }
            }
        }

        info!(ticks = ticks.load(Ordering::Relaxed), "Metrics scheduler stopped");
    }

    /// Upper bound for the export phase of one tick
    fn tick_deadline(&self) -> Duration {
        self.export_timeout.unwrap_or(self.flush_interval)
    }

    /// Drain the store and export every metric once
    pub async fn flush_once(&self) -> FlushReport {
        let mut snapshot = self.store.snapshot_and_reset();
        snapshot.resources = self.sample_resources().await;

        let points = collect_points(&snapshot);
        let total = points.len();
        let mut report = FlushReport::default();

        let mut exports = stream::iter(points)
            .map(|point| async move {
                let result = self.export_point(&point).await;
                (point, result)
            })
            .buffer_unordered(self.max_concurrent_exports);

        let drain = async {
            while let Some((point, result)) = exports.next().await {
                match result {
                    Ok(outcome) => {
                        match &outcome {
                            ExportOutcome::Delivered { .. } => {
                                debug!(metric = %point.name, "Metric pushed");
                            }
                            ExportOutcome::Rejected { status } => {
                                warn!(metric = %point.name, status, "Collector rejected metric");
                            }
                            ExportOutcome::TransportFailure { reason } => {
                                warn!(metric = %point.name, %reason, "Failed to push metric");
                            }
                        }
                        report.record(&outcome);
                    }
                    Err(e) => {
                        error!(metric = %point.name, error = %e, "Skipping metric");
                        report.encoding_skipped += 1;
                    }
                }
            }
        };

        let deadline = self.tick_deadline();
        if tokio::time::timeout(deadline, drain).await.is_err() {
            let abandoned = total - report.attempted();
            warn!(
                abandoned,
                deadline_secs = deadline.as_secs_f64(),
                "Metrics flush hit its deadline"
            );
            report.transport_failures += abandoned;
        }

        if report.failed() > 0 {
            warn!(
                delivered = report.delivered,
                rejected = report.rejected,
                transport_failures = report.transport_failures,
                encoding_skipped = report.encoding_skipped,
                "Metrics flush finished with failures"
            );
        } else {
            debug!(delivered = report.delivered, "Metrics flush finished");
        }
        report
    }

    /// Sample host resources on the blocking pool
    async fn sample_resources(&self) -> ResourceSample {
        let sampler = self.sampler.clone();
        match tokio::task::spawn_blocking(move || sampler.sample()).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "Resource sampling failed");
                ResourceSample::default()
            }
        }
    }

    /// Encode and export one point, containing any failure to this point
    async fn export_point(&self, point: &MetricPoint) -> Result<ExportOutcome, ExportError> {
        let encoded = self.encoder.encode(point).to_body()?;

        let export = AssertUnwindSafe(self.exporter.export(&encoded)).catch_unwind();
        let result = match self.export_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, export).await {
                Ok(result) => result,
                Err(_) => {
                    return Ok(ExportOutcome::TransportFailure {
                        reason: format!("export timed out after {timeout:?}"),
                    })
                }
            },
            None => export.await,
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(panic) => Ok(ExportOutcome::TransportFailure {
                reason: ExportError::Panicked(panic_message(panic)).to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("encoder", &self.encoder)
            .field("flush_interval", &self.flush_interval)
            .field("export_timeout", &self.export_timeout)
            .field("max_concurrent_exports", &self.max_concurrent_exports)
            .field("flush_on_shutdown", &self.flush_on_shutdown)
            .finish()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Build the export list for one snapshot.
///
/// Every recognized method is emitted even when its count is zero.
/// Endpoint counts and latency only appear for operations seen this
/// interval; latency is reduced to the interval mean per operation.
/// Revenue is scaled by [`REVENUE_SCALE`] before integer coercion.
pub fn collect_points(snapshot: &MetricSnapshot) -> Vec<MetricPoint> {
    let mut points = Vec::new();

    for (method, count) in snapshot.http_requests.iter() {
        points.push(
            MetricPoint::new(
                metric_name("http_requests", method.metric_suffix()),
                MetricValue::Count(count),
            )
            .with_attribute("method", method.as_str()),
        );
    }
    points.push(MetricPoint::new(
        metric_name("http_requests", "total"),
        MetricValue::Count(snapshot.total_requests),
    ));

    for (key, count) in snapshot.endpoint_counts() {
        points.push(
            MetricPoint::new(
                metric_name("endpoint_requests", key.method.metric_suffix()),
                MetricValue::Count(count),
            )
            .with_attribute("method", key.method.as_str())
            .with_attribute("endpoint", key.endpoint.as_str()),
        );
    }

    points.push(MetricPoint::new(
        "active_sessions",
        MetricValue::Count(snapshot.active_sessions),
    ));

    let auth = snapshot.auth_attempts;
    points.push(MetricPoint::new(
        metric_name("auth_attempts", "successful"),
        MetricValue::Count(auth.successful),
    ));
    points.push(MetricPoint::new(
        metric_name("auth_attempts", "failed"),
        MetricValue::Count(auth.failed),
    ));

    let orders = snapshot.domain_outcomes;
    points.push(MetricPoint::new(
        metric_name("orders", "success"),
        MetricValue::Count(orders.success),
    ));
    points.push(MetricPoint::new(
        metric_name("orders", "failure"),
        MetricValue::Count(orders.failure),
    ));

    points.push(MetricPoint::new(
        metric_name("revenue", "total_milli"),
        MetricValue::Real(snapshot.revenue * REVENUE_SCALE),
    ));

    for (key, mean) in snapshot.latency_means() {
        points.push(
            MetricPoint::new(
                metric_name("request_latency", key.method.metric_suffix()),
                MetricValue::Real(mean),
            )
            .with_attribute("method", key.method.as_str())
            .with_attribute("endpoint", key.endpoint.as_str()),
        );
    }

    let resources = snapshot.resources;
    points.push(MetricPoint::new(
        metric_name("system", "cpu_usage"),
        MetricValue::Real(resources.cpu_usage_percent),
    ));
    points.push(MetricPoint::new(
        metric_name("system", "memory_usage"),
        MetricValue::Real(resources.memory_usage_percent),
    ));

    points
}

/// Control handle for a running scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    ticks: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Number of periodic flushes completed so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop the task, running the final flush if enabled, and wait for it
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "Metrics scheduler task failed");
        }
    }
}
