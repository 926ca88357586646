//! HTTP request handlers.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{error, warn};

use nasexp_core::status::{ServiceStatus, now_millis};

use crate::state::SharedState;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// ============================================================
// Health
// ============================================================

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is healthy", body = String)
    )
)]
pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================
// Metrics
// ============================================================

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Text exposition of all probe samples; failed probes appear as `## probe: error` lines", body = String),
        (status = 500, description = "Metrics could not be rendered")
    )
)]
pub(crate) async fn handle_metrics(State(state): State<SharedState>) -> Response {
    let exporter = state.exporter.clone();
    // Probes block on files, commands and sockets.
    let rendered = tokio::task::spawn_blocking(move || {
        let mut buf = Vec::with_capacity(16 * 1024);
        exporter.write_metrics(&mut buf).map(|failure| (buf, failure))
    })
    .await;

    match rendered {
        Ok(Ok((buf, failure))) => {
            if let Some(failure) = failure {
                warn!(error = %failure, "scrape finished with probe errors");
            }
            ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], buf).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(error = %e, "metrics task panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================
// Notifications
// ============================================================

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub(crate) struct NotificationResponse {
    /// Dashboard id of the created or updated annotation.
    pub(crate) id: i64,
}

#[utoipa::path(
    post,
    path = "/notification",
    request_body(content = String, description = "Notification text", content_type = "text/plain"),
    responses(
        (status = 200, description = "Annotation created or region closed", body = NotificationResponse),
        (status = 400, description = "Empty notification"),
        (status = 404, description = "No dashboard configured"),
        (status = 502, description = "Dashboard request failed")
    )
)]
pub(crate) async fn handle_notification(
    State(state): State<SharedState>,
    body: String,
) -> Result<Json<NotificationResponse>, StatusCode> {
    let Some(annotator) = state.annotator.clone() else {
        return Err(StatusCode::NOT_FOUND);
    };
    let text = body.trim().to_string();
    if text.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let received = chrono::Utc::now();
    state.record_notification(now_millis());

    let posted = tokio::task::spawn_blocking(move || annotator.post(&text, received)).await;
    match posted {
        Ok(Ok(id)) => Ok(Json(NotificationResponse { id })),
        Ok(Err(e)) => {
            warn!(error = %e, "failed to post annotation");
            Err(StatusCode::BAD_GATEWAY)
        }
        Err(e) => {
            error!(error = %e, "annotation task panicked");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// ============================================================
// Status
// ============================================================

#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Last collection cycle and notification activity", body = ServiceStatus)
    )
)]
pub(crate) async fn handle_status(State(state): State<SharedState>) -> Json<ServiceStatus> {
    Json(state.service_status())
}
