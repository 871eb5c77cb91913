use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use std::sync::Arc;
use std::time::Duration;
use sync_core::error::SyncError;
use sync_core::synchronizer::{BatchReport, EventOutcome, Synchronizer};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub synchronizer: Arc<Synchronizer>,
    pub token: Option<Arc<str>>,
    /// How long a request waits for its batch. The batch itself always runs to completion.
    pub deadline: Option<Duration>,
}

impl AppState {
    pub fn new(synchronizer: Synchronizer, token: Option<&str>) -> Self {
        Self {
            synchronizer: Arc::new(synchronizer),
            token: token.map(Arc::from),
            deadline: None,
        }
    }
}

pub fn webhook_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle_alerts))
        .route("/alert", post(handle_alerts))
        .route("/health", get(health))
        .with_state(state)
}

/// The router as served: request tracing plus a deadline per request.
pub fn app(mut state: AppState, request_timeout: Duration) -> Router {
    state.deadline = Some(request_timeout);
    webhook_router(state).layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn handle_alerts(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !authorized(state.token.as_deref(), &headers) {
        tracing::warn!("rejected webhook with missing or wrong bearer token");
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    // A detached task keeps going when the deadline passes or the client goes
    // away, so no CachetHQ call is abandoned halfway.
    let synchronizer = state.synchronizer.clone();
    let work = tokio::spawn(async move { synchronizer.sync(&body).await });
    let joined = match state.deadline {
        Some(deadline) => match tokio::time::timeout(deadline, work).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(?deadline, "webhook batch still running after deadline");
                return error_response(StatusCode::GATEWAY_TIMEOUT, "batch still in progress");
            }
        },
        None => work.await,
    };

    let synced = match joined {
        Ok(synced) => synced,
        Err(err) => {
            tracing::error!(error = %err, "webhook batch task failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "batch task failed");
        }
    };

    match synced {
        Ok(report) => report_response(&report),
        Err(err) => {
            tracing::warn!(error = %err, "rejected webhook payload");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(serde_json::json!({"status": "error", "error": error})),
    )
        .into_response()
}

fn authorized(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .is_some_and(|(_, token)| bool::from(token.trim().as_bytes().ct_eq(expected.as_bytes())))
}

fn report_response(report: &BatchReport) -> Response {
    let status = if report.is_success() {
        StatusCode::OK
    } else if report.has_remote_failures() {
        // 5xx makes Alertmanager deliver the notification again.
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };

    let results = report.outcomes.iter().map(outcome_json).collect::<Vec<_>>();
    let body = serde_json::json!({
        "status": if report.is_success() { "ok" } else { "error" },
        "results": results,
    });
    (status, Json(body)).into_response()
}

fn outcome_json(outcome: &EventOutcome) -> serde_json::Value {
    let action = match &outcome.result {
        Ok(transition) => Some(transition.as_str()),
        Err(SyncError::RemoteSyncFailure { action, .. }) => Some(action.as_str()),
        Err(_) => None,
    };
    let error = outcome.result.as_ref().err().map(ToString::to_string);
    serde_json::json!({
        "index": outcome.index,
        "identity": outcome.identity,
        "action": action,
        "ok": outcome.is_ok(),
        "error": error,
    })
}
