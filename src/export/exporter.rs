//! Collector delivery
//!
//! One POST per payload, no retries. Whatever happens is reported as an
//! [`ExportOutcome`] for the scheduler to log.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

use super::encoder::EncodedPayload;
use crate::error::ExportError;

/// Result of a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Collector answered 2xx
    Delivered { status: u16 },
    /// Collector reachable, non-success status
    Rejected { status: u16 },
    /// Network, DNS or timeout error
    TransportFailure { reason: String },
}

impl ExportOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ExportOutcome::Delivered { .. })
    }
}

impl fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportOutcome::Delivered { status } => write!(f, "delivered ({status})"),
            ExportOutcome::Rejected { status } => write!(f, "rejected ({status})"),
            ExportOutcome::TransportFailure { reason } => write!(f, "transport failure: {reason}"),
        }
    }
}

impl From<Result<u16, ExportError>> for ExportOutcome {
    fn from(result: Result<u16, ExportError>) -> Self {
        match result {
            Ok(status) => ExportOutcome::Delivered { status },
            Err(ExportError::Rejected { status }) => ExportOutcome::Rejected { status },
            Err(e) => ExportOutcome::TransportFailure {
                reason: e.to_string(),
            },
        }
    }
}

/// Delivers encoded payloads somewhere
#[async_trait]
pub trait MetricExporter: Send + Sync {
    async fn export(&self, payload: &EncodedPayload) -> ExportOutcome;
}

/// Collector connection settings
#[derive(Clone)]
pub struct HttpExporterConfig {
    pub collector_url: Url,
    pub bearer_token: String,
    /// Upper bound for one request, connect included
    pub timeout: Duration,
}

impl fmt::Debug for HttpExporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExporterConfig")
            .field("collector_url", &self.collector_url.as_str())
            .field("bearer_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Pushes payloads to an OTLP/HTTP collector with bearer authentication
#[derive(Debug, Clone)]
pub struct HttpExporter {
    config: HttpExporterConfig,
    client: Client,
}

impl HttpExporter {
    pub fn new(config: HttpExporterConfig) -> Result<Self, ExportError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn send(&self, payload: &EncodedPayload) -> Result<u16, ExportError> {
        let response = self
            .client
            .post(self.config.collector_url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.config.bearer_token))
            .header(CONTENT_TYPE, "application/json")
            .body(payload.body.clone())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(ExportError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl MetricExporter for HttpExporter {
    #[instrument(skip(self, payload), fields(metric = %payload.metric_name))]
    async fn export(&self, payload: &EncodedPayload) -> ExportOutcome {
        let outcome = ExportOutcome::from(self.send(payload).await);
        debug!(%outcome, "Export attempt finished");
        outcome
    }
}
