//! Structured forwarding outcome records.

use serde::Serialize;
use tracing::{error, info};

/// How a forwarded call resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Upstream answered with this HTTP status
    Status(u16),
    /// Every attempt failed at the transport level; holds the last error
    Error(String),
}

/// One record per forwarded call, written when the call resolves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardOutcome {
    pub trace_id: String,
    pub client_id: String,
    pub method: String,
    pub path: String,
    pub status: OutcomeStatus,
    /// Time from the first attempt to final resolution
    pub latency_ms: f64,
    /// Number of attempts that failed at the transport level
    pub retry_count: u32,
}

impl ForwardOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Status(_))
    }
}

/// Receives outcome records. Formatting is the sink's business.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, outcome: &ForwardOutcome);
}

/// Emits outcome records as structured `tracing` events.
#[derive(Debug, Clone)]
pub struct TracingSink {
    base_url: String,
}

impl TracingSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl OutcomeSink for TracingSink {
    fn record(&self, outcome: &ForwardOutcome) {
        match &outcome.status {
            OutcomeStatus::Status(status) => info!(
                target: "turnstile::upstream",
                trace_id = %outcome.trace_id,
                client_id = %outcome.client_id,
                method = %outcome.method,
                path = %outcome.path,
                status = *status,
                latency_ms = outcome.latency_ms,
                retries = outcome.retry_count,
                upstream = %self.base_url,
                "Upstream call completed"
            ),
            OutcomeStatus::Error(err) => error!(
                target: "turnstile::upstream",
                trace_id = %outcome.trace_id,
                client_id = %outcome.client_id,
                method = %outcome.method,
                path = %outcome.path,
                status = "error",
                error = %err,
                latency_ms = outcome.latency_ms,
                retries = outcome.retry_count,
                upstream = %self.base_url,
                "Upstream call failed"
            ),
        }
    }
}
