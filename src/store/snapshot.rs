//! Snapshot and key types shared by the store and the exporter

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::sampler::ResourceSample;

/// HTTP methods the store keeps request counters for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    /// Every recognized method, in export order
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
    ];

    /// Canonical upper-case name
    pub const fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// Lower-case form used as a metric name suffix
    pub const fn metric_suffix(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Delete => "delete",
            HttpMethod::Patch => "patch",
        }
    }

    pub(crate) const fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a method name is outside the recognized set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl fmt::Display for UnknownMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized HTTP method: {}", self.0)
    }
}

impl std::error::Error for UnknownMethod {}

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

/// Latency breakdown key: one logical operation served by the application
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey {
    pub method: HttpMethod,
    pub endpoint: String,
}

impl OperationKey {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.endpoint)
    }
}

/// Per-method request counts for one interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts([u64; HttpMethod::ALL.len()]);

impl RequestCounts {
    #[inline]
    pub(crate) fn increment(&mut self, method: HttpMethod) {
        self.0[method.index()] += 1;
    }

    /// Count for one method
    pub fn get(&self, method: HttpMethod) -> u64 {
        self.0[method.index()]
    }

    /// Sum over all methods
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Iterate every recognized method with its count, zeros included
    pub fn iter(&self) -> impl Iterator<Item = (HttpMethod, u64)> + '_ {
        HttpMethod::ALL.into_iter().map(|m| (m, self.get(m)))
    }
}

/// Authentication outcome totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthAttempts {
    pub successful: u64,
    pub failed: u64,
}

/// Business transaction outcome totals (completed vs failed orders)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainOutcomes {
    pub success: u64,
    pub failure: u64,
}

/// Point-in-time copy of the counter store
#[derive(Debug, Clone, Default)]
pub struct MetricSnapshot {
    pub http_requests: RequestCounts,
    /// Always equal to `http_requests.total()`
    pub total_requests: u64,
    /// Per-endpoint breakdown, capped per interval
    pub endpoint_requests: HashMap<OperationKey, u64>,
    pub active_sessions: u64,
    pub auth_attempts: AuthAttempts,
    pub domain_outcomes: DomainOutcomes,
    pub revenue: f64,
    pub latency: HashMap<OperationKey, Vec<f64>>,
    /// Filled in by the scheduler at flush time
    pub resources: ResourceSample,
}

impl MetricSnapshot {
    /// Endpoint request counts, sorted by key for stable export order
    pub fn endpoint_counts(&self) -> Vec<(&OperationKey, u64)> {
        let mut counts: Vec<_> = self
            .endpoint_requests
            .iter()
            .map(|(key, count)| (key, *count))
            .collect();
        counts.sort_by(|a, b| a.0.cmp(b.0));
        counts
    }

    /// Latency means per operation, sorted by key for stable export order
    pub fn latency_means(&self) -> Vec<(&OperationKey, f64)> {
        let mut means: Vec<_> = self
            .latency
            .iter()
            .map(|(key, samples)| (key, mean(samples)))
            .collect();
        means.sort_by(|a, b| a.0.cmp(b.0));
        means
    }
}

/// Arithmetic mean, 0.0 for an empty sample set
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}
