//! Counter store for application telemetry
//!
//! Cumulative totals are lock-free atomics. Per-interval state (request
//! counts, the per-endpoint breakdown and latency samples) sits behind one
//! short mutex so that a flush can swap it out in a single critical section.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::snapshot::{
    AuthAttempts, DomainOutcomes, HttpMethod, MetricSnapshot, OperationKey, RequestCounts,
};

/// Default cap on distinct operation keys admitted within one interval,
/// applied separately to request breakdown and latency
pub const DEFAULT_MAX_OPERATION_KEYS: usize = 256;

/// State that is handed to the exporter and cleared on every flush
#[derive(Debug, Default, Clone)]
struct IntervalState {
    requests: RequestCounts,
    endpoint_requests: HashMap<OperationKey, u64>,
    latency: HashMap<OperationKey, Vec<f64>>,
}

/// Process-lifetime aggregate of operational signals
pub struct CounterStore {
    interval: Mutex<IntervalState>,
    max_operation_keys: usize,

    // Cumulative, never reset by a flush
    active_sessions: AtomicU64,
    auth_successful: AtomicU64,
    auth_failed: AtomicU64,
    domain_success: AtomicU64,
    domain_failure: AtomicU64,
    /// f64 bit pattern
    revenue_bits: AtomicU64,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::with_max_operation_keys(DEFAULT_MAX_OPERATION_KEYS)
    }

    /// Create a store admitting at most `max_operation_keys` operations per interval
    pub fn with_max_operation_keys(max_operation_keys: usize) -> Self {
        Self {
            interval: Mutex::new(IntervalState::default()),
            max_operation_keys,
            active_sessions: AtomicU64::new(0),
            auth_successful: AtomicU64::new(0),
            auth_failed: AtomicU64::new(0),
            domain_success: AtomicU64::new(0),
            domain_failure: AtomicU64::new(0),
            revenue_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    // Request tracking
    #[inline]
    pub fn increment_http_request(&self, method: HttpMethod) {
        self.interval.lock().requests.increment(method);
    }

    /// Count a request for one endpoint.
    ///
    /// The per-method count always moves. Returns `false` when the endpoint
    /// breakdown is full and this key was not admitted.
    pub fn increment_operation_request(&self, key: OperationKey) -> bool {
        let mut interval = self.interval.lock();
        interval.requests.increment(key.method);
        if let Some(count) = interval.endpoint_requests.get_mut(&key) {
            *count += 1;
            return true;
        }
        if interval.endpoint_requests.len() >= self.max_operation_keys {
            drop(interval);
            debug!(
                operation = %key,
                max_keys = self.max_operation_keys,
                "Endpoint key limit reached, counting method only"
            );
            return false;
        }
        interval.endpoint_requests.insert(key, 1);
        true
    }

    /// Count a request given its raw method name.
    ///
    /// Returns `false` when the method is not recognized; the call is then a no-op.
    pub fn increment_http_request_str(&self, method: &str) -> bool {
        match method.parse::<HttpMethod>() {
            Ok(method) => {
                self.increment_http_request(method);
                true
            }
            Err(e) => {
                debug!(error = %e, "Ignoring request count");
                false
            }
        }
    }

    // Session gauge
    #[inline]
    pub fn increment_active_sessions(&self, n: u64) {
        self.active_sessions.fetch_add(n, Ordering::Relaxed);
    }

    /// Decrease the gauge, clamping at zero
    #[inline]
    pub fn decrement_active_sessions(&self, n: u64) {
        // The closure always returns Some, so this cannot fail
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(n))
            });
    }

    // Auth tracking
    #[inline]
    pub fn record_auth_attempt(&self, success: bool) {
        let counter = if success {
            &self.auth_successful
        } else {
            &self.auth_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // Domain tracking
    #[inline]
    pub fn record_domain_outcome(&self, success: bool) {
        let counter = if success {
            &self.domain_success
        } else {
            &self.domain_failure
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to the revenue accumulator.
    ///
    /// Negative and non-finite amounts are rejected and leave the total untouched.
    pub fn record_revenue(&self, amount: f64) -> bool {
        if !amount.is_finite() || amount < 0.0 {
            warn!(amount, "Rejecting revenue amount");
            return false;
        }
        let _ = self
            .revenue_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + amount).to_bits())
            });
        true
    }

    /// Append one latency sample in milliseconds.
    ///
    /// New operation keys are admitted until the per-interval cap is reached.
    pub fn record_latency(&self, key: OperationKey, duration_ms: f64) -> bool {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            debug!(operation = %key, duration_ms, "Ignoring invalid latency sample");
            return false;
        }

        let mut interval = self.interval.lock();
        if let Some(samples) = interval.latency.get_mut(&key) {
            samples.push(duration_ms);
            return true;
        }
        if interval.latency.len() >= self.max_operation_keys {
            drop(interval);
            debug!(
                operation = %key,
                max_keys = self.max_operation_keys,
                "Latency key limit reached, dropping sample"
            );
            return false;
        }
        interval.latency.insert(key, vec![duration_ms]);
        true
    }

    /// Current gauge value
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Current revenue total
    pub fn revenue(&self) -> f64 {
        f64::from_bits(self.revenue_bits.load(Ordering::Acquire))
    }

    /// Snapshot without resetting anything
    pub fn peek(&self) -> MetricSnapshot {
        let interval = self.interval.lock().clone();
        self.assemble(interval)
    }

    /// Take a point-in-time snapshot and start a new interval.
    ///
    /// Request counts and latency samples are moved out under the interval
    /// lock; writes that race with the swap land in the next interval.
    /// Cumulative totals are only read.
    pub fn snapshot_and_reset(&self) -> MetricSnapshot {
        let interval = mem::take(&mut *self.interval.lock());
        self.assemble(interval)
    }

    fn assemble(&self, interval: IntervalState) -> MetricSnapshot {
        MetricSnapshot {
            http_requests: interval.requests,
            total_requests: interval.requests.total(),
            endpoint_requests: interval.endpoint_requests,
            active_sessions: self.active_sessions(),
            auth_attempts: AuthAttempts {
                successful: self.auth_successful.load(Ordering::Relaxed),
                failed: self.auth_failed.load(Ordering::Relaxed),
            },
            domain_outcomes: DomainOutcomes {
                success: self.domain_success.load(Ordering::Relaxed),
                failure: self.domain_failure.load(Ordering::Relaxed),
            },
            revenue: self.revenue(),
            latency: interval.latency,
            resources: Default::default(),
        }
    }
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterStore")
            .field("max_operation_keys", &self.max_operation_keys)
            .field("active_sessions", &self.active_sessions())
            .field("revenue", &self.revenue())
            .finish()
    }
}
