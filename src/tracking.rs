//! Tracking facade for request-handling code
//!
//! Everything here is a synchronous in-memory update on the shared
//! [`CounterStore`]; nothing waits on the scheduler or the network.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::store::{CounterStore, HttpMethod, OperationKey};

/// Cloneable handle given to route handlers and middleware
#[derive(Debug, Clone)]
pub struct Tracker {
    store: Arc<CounterStore>,
}

impl Tracker {
    pub fn new(store: Arc<CounterStore>) -> Self {
        Self { store }
    }

    /// Underlying store, for wiring the scheduler
    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }

    // Direct notifications

    #[inline]
    pub fn http_request(&self, method: HttpMethod) {
        self.store.increment_http_request(method);
    }

    /// Count a request and its endpoint breakdown
    #[inline]
    pub fn http_request_to(&self, method: HttpMethod, endpoint: &str) -> bool {
        self.store
            .increment_operation_request(OperationKey::new(method, endpoint))
    }

    /// Count a request by raw method name; unknown methods are ignored
    #[inline]
    pub fn http_request_str(&self, method: &str) -> bool {
        self.store.increment_http_request_str(method)
    }

    #[inline]
    pub fn auth_attempt(&self, success: bool) {
        self.store.record_auth_attempt(success);
    }

    #[inline]
    pub fn sessions_started(&self, n: u64) {
        self.store.increment_active_sessions(n);
    }

    #[inline]
    pub fn sessions_ended(&self, n: u64) {
        self.store.decrement_active_sessions(n);
    }

    /// Record a completed order and its revenue.
    ///
    /// The order is counted even when the revenue amount is rejected.
    pub fn order_completed(&self, revenue: f64) -> bool {
        self.store.record_domain_outcome(true);
        self.store.record_revenue(revenue)
    }

    #[inline]
    pub fn order_failed(&self) {
        self.store.record_domain_outcome(false);
    }

    #[inline]
    pub fn revenue(&self, amount: f64) -> bool {
        self.store.record_revenue(amount)
    }

    #[inline]
    pub fn latency(&self, method: HttpMethod, endpoint: &str, duration_ms: f64) -> bool {
        self.store
            .record_latency(OperationKey::new(method, endpoint), duration_ms)
    }

    // Lifecycle hooks

    /// Start timing a request; the count and latency are recorded when the
    /// guard finishes or is dropped
    pub fn begin_request(&self, method: HttpMethod, endpoint: impl Into<String>) -> RequestGuard {
        RequestGuard {
            store: self.store.clone(),
            key: Some(OperationKey::new(method, endpoint)),
            started: Instant::now(),
        }
    }

    /// Mark a session open until the guard is dropped
    pub fn begin_session(&self) -> SessionGuard {
        self.store.increment_active_sessions(1);
        SessionGuard {
            store: self.store.clone(),
        }
    }

    /// Run `work` as one tracked request.
    ///
    /// A future dropped before completion still counts, with the latency
    /// observed up to that point.
    pub async fn instrument<F>(&self, method: HttpMethod, endpoint: &str, work: F) -> F::Output
    where
        F: Future,
    {
        let guard = self.begin_request(method, endpoint);
        let output = work.await;
        guard.finish();
        output
    }
}

/// Records one request when finished or dropped, exactly once
#[derive(Debug)]
#[must_use = "dropping the guard immediately records a zero-length request"]
pub struct RequestGuard {
    store: Arc<CounterStore>,
    key: Option<OperationKey>,
    started: Instant,
}

impl RequestGuard {
    /// Endpoint being timed
    pub fn key(&self) -> Option<&OperationKey> {
        self.key.as_ref()
    }

    /// Record now and return the elapsed milliseconds
    pub fn finish(mut self) -> f64 {
        self.record()
    }

    fn record(&mut self) -> f64 {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        if let Some(key) = self.key.take() {
            self.store.increment_operation_request(key.clone());
            self.store.record_latency(key, elapsed_ms);
        }
        elapsed_ms
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.record();
    }
}

/// Keeps the active-session gauge raised while alive
#[derive(Debug)]
#[must_use = "dropping the guard immediately ends the session"]
pub struct SessionGuard {
    store: Arc<CounterStore>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.store.decrement_active_sessions(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> Tracker {
        Tracker::new(Arc::new(CounterStore::new()))
    }

    #[test]
    fn test_request_guard_records_once() {
        let tracker = tracker();
        let guard = tracker.begin_request(HttpMethod::Put, "/api/auth");
        let elapsed = guard.finish();
        assert!(elapsed >= 0.0);

        let snapshot = tracker.store().peek();
        assert_eq!(snapshot.http_requests.get(HttpMethod::Put), 1);
        let key = OperationKey::new(HttpMethod::Put, "/api/auth");
        assert_eq!(snapshot.endpoint_requests[&key], 1);
        assert_eq!(snapshot.latency[&key].len(), 1);
    }

    #[test]
    fn test_request_guard_records_on_drop() {
        let tracker = tracker();
        {
            let _guard = tracker.begin_request(HttpMethod::Delete, "/api/auth");
        }
        assert_eq!(tracker.store().peek().total_requests, 1);
    }

    #[test]
    fn test_session_guard_tracks_gauge() {
        let tracker = tracker();
        let first = tracker.begin_session();
        let second = tracker.begin_session();
        assert_eq!(tracker.store().active_sessions(), 2);

        drop(first);
        assert_eq!(tracker.store().active_sessions(), 1);

        // Explicit logout racing with the guard must not underflow
        tracker.sessions_ended(5);
        drop(second);
        assert_eq!(tracker.store().active_sessions(), 0);
    }

    #[test]
    fn test_orders_and_revenue() {
        let tracker = tracker();
        assert!(tracker.order_completed(0.05));
        assert!(!tracker.order_completed(-1.0));
        tracker.order_failed();

        let snapshot = tracker.store().peek();
        assert_eq!(snapshot.domain_outcomes.success, 2);
        assert_eq!(snapshot.domain_outcomes.failure, 1);
        assert!((snapshot.revenue - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_direct_calls() {
        let tracker = tracker();
        tracker.http_request(HttpMethod::Get);
        assert!(tracker.http_request_to(HttpMethod::Get, "/api/franchise"));
        assert!(tracker.http_request_str("POST"));
        assert!(!tracker.http_request_str("CONNECT"));
        tracker.auth_attempt(false);
        tracker.sessions_started(3);
        tracker.sessions_ended(1);
        assert!(tracker.latency(HttpMethod::Get, "/api/order/menu", 4.5));

        let snapshot = tracker.store().peek();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.endpoint_requests.len(), 1);
        assert_eq!(snapshot.auth_attempts.failed, 1);
        assert_eq!(snapshot.active_sessions, 2);
    }

    #[test]
    fn test_instrument_wraps_future() {
        let tracker = tracker();
        let value = tokio_test::block_on(tracker.instrument(
            HttpMethod::Post,
            "/api/order",
            async { 41 + 1 },
        ));
        assert_eq!(value, 42);

        let snapshot = tracker.store().snapshot_and_reset();
        assert_eq!(snapshot.http_requests.get(HttpMethod::Post), 1);
        assert_eq!(snapshot.latency.len(), 1);
    }
}
