//! Retrying upstream forwarder.

use futures::future::{BoxFuture, FutureExt};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::outcome::{ForwardOutcome, OutcomeSink, OutcomeStatus, TracingSink};
use super::transport::{Transport, TransportError, UpstreamRequest, UpstreamResponse};
use crate::config::UpstreamConfig;
use crate::error::{Result, TurnstileError};

/// Sleeps between attempts. Injected so tests can observe backoff without
/// waiting for it.
pub type DelayFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Default [`DelayFn`]: a tokio sleep.
pub fn tokio_delay() -> DelayFn {
    Arc::new(|duration: Duration| tokio::time::sleep(duration).boxed())
}

/// An admitted request to forward upstream.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path appended to the upstream base URL
    pub path: String,
    pub client_id: String,
    pub trace_id: String,
    /// Extra headers; the gateway's own headers take precedence
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub query: Vec<(String, String)>,
}

impl ForwardRequest {
    pub fn new(method: Method, path: &str, client_id: &str, trace_id: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            client_id: client_id.to_string(),
            trace_id: trace_id.to_string(),
            headers: Vec::new(),
            body: None,
            query: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }
}

/// A successfully forwarded call.
#[derive(Debug, Clone)]
pub struct Forwarded {
    /// Upstream's response, whatever its status
    pub response: UpstreamResponse,
    /// Attempts that failed before this one succeeded
    pub retry_count: u32,
    pub latency: Duration,
}

/// Issues upstream calls with a per-attempt timeout and exponential backoff.
///
/// Only transport failures are retried. The executor assumes the caller
/// already holds an admission slot.
pub struct ForwardingExecutor {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_token: String,
    max_retries: u32,
    attempt_timeout: Duration,
    backoff_base: Duration,
    delay: DelayFn,
    sink: Arc<dyn OutcomeSink>,
}

impl ForwardingExecutor {
    /// Create an executor for the configured upstream.
    pub fn new(transport: Arc<dyn Transport>, config: &UpstreamConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            max_retries: config.max_retries,
            attempt_timeout: Duration::from_secs(config.request_timeout_secs),
            backoff_base: Duration::from_secs(1),
            delay: tokio_delay(),
            sink: Arc::new(TracingSink::new(config.base_url.clone())),
        }
    }

    /// Replace the delay used between attempts.
    pub fn with_delay(mut self, delay: DelayFn) -> Self {
        self.delay = delay;
        self
    }

    /// Replace where outcome records go.
    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Backoff before the attempt following `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Forward a request, retrying transport failures.
    ///
    /// Exactly one outcome record is emitted per call.
    pub async fn forward(&self, request: ForwardRequest) -> Result<Forwarded> {
        let upstream = self.build_request(&request);
        let attempts = self.max_retries.max(1);
        let start = Instant::now();
        let mut retry_count = 0;
        let mut last_error = TransportError::Request("no attempt made".to_string());

        for attempt in 0..attempts {
            debug!(
                trace_id = %request.trace_id,
                attempt = attempt + 1,
                url = %upstream.url,
                "Forwarding request upstream"
            );

            match self.attempt(&upstream).await {
                Ok(response) => {
                    let latency = start.elapsed();
                    self.sink.record(&self.outcome(
                        &request,
                        OutcomeStatus::Status(response.status),
                        latency,
                        retry_count,
                    ));
                    return Ok(Forwarded {
                        response,
                        retry_count,
                        latency,
                    });
                }
                Err(e) => {
                    retry_count += 1;
                    warn!(
                        trace_id = %request.trace_id,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Upstream request failed"
                    );
                    last_error = e;
                    if attempt + 1 < attempts {
                        (self.delay)(self.backoff(attempt)).await;
                    }
                }
            }
        }

        let latency = start.elapsed();
        self.sink.record(&self.outcome(
            &request,
            OutcomeStatus::Error(last_error.to_string()),
            latency,
            retry_count,
        ));

        Err(TurnstileError::UpstreamUnreachable {
            retry_count,
            last_error: last_error.to_string(),
        })
    }

    /// One attempt, bounded by the attempt timeout.
    async fn attempt(
        &self,
        request: &UpstreamRequest,
    ) -> std::result::Result<UpstreamResponse, TransportError> {
        match tokio::time::timeout(self.attempt_timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn build_request(&self, request: &ForwardRequest) -> UpstreamRequest {
        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter(|(name, _)| !is_gateway_header(name))
            .cloned()
            .collect();

        headers.push((
            "Authorization".to_string(),
            format!("Bearer {}", self.api_token),
        ));
        headers.push(("Accept".to_string(), "application/json".to_string()));
        headers.push(("X-Trace-ID".to_string(), request.trace_id.clone()));
        if request.body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        UpstreamRequest {
            method: request.method.clone(),
            url: format!("{}{}", self.base_url, request.path),
            headers,
            query: request.query.clone(),
            body: request.body.clone(),
        }
    }

    fn outcome(
        &self,
        request: &ForwardRequest,
        status: OutcomeStatus,
        latency: Duration,
        retry_count: u32,
    ) -> ForwardOutcome {
        ForwardOutcome {
            trace_id: request.trace_id.clone(),
            client_id: request.client_id.clone(),
            method: request.method.to_string(),
            path: request.path.clone(),
            status,
            latency_ms: (latency.as_secs_f64() * 100_000.0).round() / 100.0,
            retry_count,
        }
    }
}

fn is_gateway_header(name: &str) -> bool {
    ["authorization", "accept", "x-trace-id", "content-type"]
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}
