//! HTTP routes: admission preamble plus forwarding.

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info, instrument};

use super::error::ApiError;
use super::state::GatewayState;
use crate::admission::{AdmissionDecision, OperationClass};
use crate::forward::{ForwardRequest, UpstreamResponse};

const CLIENT_ID_HEADER: &str = "x-client-id";
const TRACE_ID_HEADER: &str = "x-trace-id";

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/rest/api/3/issue", post(create_issue))
        .route("/rest/api/3/issue/:issue_id_or_key", get(get_issue))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "turnstile" }))
}

async fn metrics(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.admission.snapshot())
}

#[instrument(skip_all, fields(issue = %issue_id_or_key))]
async fn get_issue(
    State(state): State<GatewayState>,
    Path(issue_id_or_key): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = format!("/rest/api/3/issue/{}", issue_id_or_key);
    admit_and_forward(&state, &headers, Method::GET, &path, None, query).await
}

#[instrument(skip_all)]
async fn create_issue(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = serde_json::from_slice::<serde_json::Value>(&body).ok();
    admit_and_forward(
        &state,
        &headers,
        Method::POST,
        "/rest/api/3/issue",
        body,
        Vec::new(),
    )
    .await
}

/// Identify the client, admit, forward, and release the slot.
///
/// The slot guard lives until the forward call resolves. If the handler
/// future is dropped first, the guard's drop returns the slot.
async fn admit_and_forward(
    state: &GatewayState,
    headers: &HeaderMap,
    method: Method,
    path: &str,
    body: Option<serde_json::Value>,
    query: Vec<(String, String)>,
) -> Result<Response, ApiError> {
    let client_id = header_value(headers, CLIENT_ID_HEADER).ok_or(ApiError::MissingClientId)?;
    let trace_id = header_value(headers, TRACE_ID_HEADER)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let Some(client) = state.clients.get(&client_id) else {
        info!(
            target: "turnstile::admission",
            client_id = %client_id,
            trace_id = %trace_id,
            "Unknown client"
        );
        return Err(ApiError::UnknownClient(client_id));
    };

    let operation = OperationClass::from_method(method.as_str());
    let guard = match state
        .admission
        .admit(&client_id, &client.tier, operation, &trace_id)
    {
        AdmissionDecision::Admitted(guard) => guard,
        AdmissionDecision::Denied(reason) => {
            info!(
                target: "turnstile::admission",
                client_id = %client_id,
                tier = %client.tier,
                operation = %operation,
                reason = %reason,
                trace_id = %trace_id,
                "Request denied"
            );
            return Err(ApiError::Denied { reason, operation });
        }
    };

    info!(
        target: "turnstile::admission",
        client_id = %client_id,
        tier = %client.tier,
        method = %method,
        path = %path,
        trace_id = %trace_id,
        "Request allowed"
    );

    let mut request = ForwardRequest::new(method, path, &client_id, &trace_id).with_query(query);
    request.body = body;

    let result = state.executor.forward(request).await;
    if let Err(e) = guard.release() {
        error!(trace_id = %trace_id, error = %e, "Concurrency slot release failed");
    }

    let forwarded = result.map_err(ApiError::Upstream)?;
    Ok(upstream_response(forwarded.response, &trace_id))
}

fn is_bodiless(status: StatusCode) -> bool {
    status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Pass upstream's status and body through, tagged with the trace id.
fn upstream_response(upstream: UpstreamResponse, trace_id: &str) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = if upstream.body.is_empty() && !is_bodiless(status) {
        Body::from("{}")
    } else {
        Body::from(upstream.body)
    };
    let content_type = upstream
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}
