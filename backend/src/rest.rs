//! REST layer: application state, routes, and handlers.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shared::ExportRequest;
use std::sync::Arc;
use tracing::info;

use crate::auth::AuthProvider;
use crate::domain::{ExportService, RateLimiter};
use crate::error::ExportError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub export_service: ExportService,
    pub rate_limiter: Arc<RateLimiter>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    pub fn new(
        export_service: ExportService,
        rate_limiter: Arc<RateLimiter>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            export_service,
            rate_limiter,
            auth,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/attendance/export", post(export_attendance))
        .route("/attendance/export/stats", get(rate_limit_stats))
        .route(
            "/attendance/export/reset-limit/:user_id",
            post(reset_rate_limit),
        )
        .route("/health", get(health));

    Router::new().nest("/api", api_routes).with_state(state)
}

/// Axum handler for POST /api/attendance/export
///
/// A missing or malformed JSON body falls through to the validator as an
/// empty request, so the caller gets the contract's "missing parameters"
/// reason instead of a framework rejection.
async fn export_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<ExportRequest>>,
) -> Result<Response, ExportError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    info!("POST /api/attendance/export - request: {:?}", request);

    let identity = state.auth.authenticate(&headers);
    let export = state.export_service.export(identity, request).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export.filename),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-ratelimit-limit", export.rate_limit.to_string())
        .header(
            "x-ratelimit-remaining",
            export.rate_limit_remaining.to_string(),
        )
        .body(export.body)
        .map_err(|err| ExportError::Internal(err.to_string()))
}

/// Axum handler for GET /api/attendance/export/stats
async fn rate_limit_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.rate_limiter.stats())
}

/// Axum handler for POST /api/attendance/export/reset-limit/:user_id
/// (administrative override)
async fn reset_rate_limit(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    info!("resetting rate limit for user {user_id}");
    state.rate_limiter.reset(&user_id);
    StatusCode::NO_CONTENT
}

/// Axum handler for GET /api/health
async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
