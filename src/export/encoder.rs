//! OTLP/JSON metric encoding
//!
//! Every payload carries exactly one metric with one cumulative, monotonic
//! sum data point. Values always go out as `asInt`; see [`MetricValue`] for
//! the coercion rule applied to fractional values.

use bytes::Bytes;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ExportError;

/// Attribute key injected into every data point
pub const SOURCE_ATTRIBUTE: &str = "source";

const CUMULATIVE: &str = "AGGREGATION_TEMPORALITY_CUMULATIVE";

/// Value of one exported metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Integer-family metric (counts, gauges)
    Count(u64),
    /// Fractional metric (revenue, percentages, mean latency)
    Real(f64),
}

impl MetricValue {
    /// Integer sent on the wire.
    ///
    /// Counts saturate at `i64::MAX`. Reals round to the nearest integer with
    /// halves away from zero; NaN and negatives become 0 and values beyond
    /// `i64::MAX` saturate.
    pub fn as_wire_int(&self) -> i64 {
        match *self {
            MetricValue::Count(n) => i64::try_from(n).unwrap_or(i64::MAX),
            MetricValue::Real(v) => {
                if v.is_nan() || v <= 0.0 {
                    0
                } else {
                    // `as` saturates for out-of-range floats
                    v.round() as i64
                }
            }
        }
    }
}

/// One metric to be exported this tick
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub value: MetricValue,
    pub attributes: Vec<(String, String)>,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            value,
            attributes: Vec::new(),
        }
    }

    /// Append one attribute, keeping insertion order
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }
}

/// Join a parent metric name and a child key
pub fn metric_name(parent: &str, child: &str) -> String {
    format!("{parent}_{child}")
}

// Wire structures

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPayload {
    pub resource_metrics: Vec<ResourceMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeMetrics {
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub unit: &'static str,
    pub sum: Sum,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sum {
    pub data_points: Vec<DataPoint>,
    pub aggregation_temporality: &'static str,
    pub is_monotonic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub as_int: i64,
    pub time_unix_nano: u64,
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyValue {
    pub string_value: String,
}

impl MetricPayload {
    /// Name of the single metric carried by this payload
    pub fn metric_name(&self) -> &str {
        self.metric().map(|m| m.name.as_str()).unwrap_or_default()
    }

    /// The carried data point
    pub fn data_point(&self) -> Option<&DataPoint> {
        self.metric()?.sum.data_points.first()
    }

    fn metric(&self) -> Option<&Metric> {
        self.resource_metrics
            .first()?
            .scope_metrics
            .first()?
            .metrics
            .first()
    }

    /// Serialize to a request body
    pub fn to_body(&self) -> Result<EncodedPayload, ExportError> {
        let body = serde_json::to_vec(self).map_err(|source| ExportError::Encoding {
            metric: self.metric_name().to_string(),
            source,
        })?;
        Ok(EncodedPayload {
            metric_name: self.metric_name().to_string(),
            body: Bytes::from(body),
        })
    }
}

/// Serialized request body ready for the exporter
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPayload {
    pub metric_name: String,
    pub body: Bytes,
}

/// Builds collector payloads tagged with a fixed source label
#[derive(Debug, Clone)]
pub struct Encoder {
    source: String,
}

impl Encoder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Encode with the current wall-clock time.
    ///
    /// `SystemTime` provides nanosecond resolution on the supported
    /// platforms, so no millisecond scaling is involved.
    pub fn encode(&self, point: &MetricPoint) -> MetricPayload {
        self.encode_at(point, now_unix_nanos())
    }

    /// Encode with an explicit timestamp
    pub fn encode_at(&self, point: &MetricPoint, time_unix_nano: u64) -> MetricPayload {
        let attributes = point
            .attributes
            .iter()
            .filter(|(key, _)| key != SOURCE_ATTRIBUTE)
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .chain(std::iter::once((SOURCE_ATTRIBUTE, self.source.as_str())))
            .map(|(key, value)| KeyValue {
                key: key.to_string(),
                value: AnyValue {
                    string_value: value.to_string(),
                },
            })
            .collect();

        MetricPayload {
            resource_metrics: vec![ResourceMetrics {
                scope_metrics: vec![ScopeMetrics {
                    metrics: vec![Metric {
                        name: point.name.clone(),
                        unit: "1",
                        sum: Sum {
                            data_points: vec![DataPoint {
                                as_int: point.value.as_wire_int(),
                                time_unix_nano,
                                attributes,
                            }],
                            aggregation_temporality: CUMULATIVE,
                            is_monotonic: true,
                        },
                    }],
                }],
            }],
        }
    }
}

fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
