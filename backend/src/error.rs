//! Error taxonomy for the export pipeline.
//!
//! Every pre-flight failure maps to one structured JSON response. Failures
//! after streaming has begun never reach this module: headers are committed
//! by then, so they are logged and the connection is dropped instead.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared::ErrorResponse;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::domain::validation::ValidationError;

/// A rejected or failed export, detected before any response byte is sent.
#[derive(Debug, Error)]
pub enum ExportError {
    /// No identity could be resolved for the caller
    #[error("Authentication required")]
    Unauthenticated,

    /// Caller is known but lacks the export permission
    #[error("Forbidden")]
    Forbidden,

    /// CSV export feature flag is off for this deployment
    #[error("Export feature is not enabled")]
    FeatureDisabled,

    /// Caller exhausted their fixed-window quota
    #[error("Rate limit exceeded. Too many export requests.")]
    RateLimited { retry_after_secs: u64, limit: u32 },

    /// One of the five ordered validation rules failed
    #[error(transparent)]
    InvalidRequest(#[from] ValidationError),

    /// Pre-flight count exceeded the configured ceiling
    #[error("Dataset too large. Maximum {max_records} records allowed. Found {total_records} records.")]
    DatasetTooLarge { total_records: u64, max_records: u64 },

    /// Count or page fetch failed in the attendance store
    #[error("attendance store failure: {0}")]
    Store(String),

    /// Anything unclassified
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ExportError {
    fn from(err: anyhow::Error) -> Self {
        ExportError::Internal(err.to_string())
    }
}

impl ExportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExportError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ExportError::Forbidden | ExportError::FeatureDisabled => StatusCode::FORBIDDEN,
            ExportError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ExportError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ExportError::DatasetTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ExportError::Store(_) | ExportError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short name used in outcome logs.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            ExportError::Unauthenticated => "unauthenticated",
            ExportError::Forbidden => "forbidden",
            ExportError::FeatureDisabled => "feature_disabled",
            ExportError::RateLimited { .. } => "rate_limited",
            ExportError::InvalidRequest(_) => "invalid_request",
            ExportError::DatasetTooLarge { .. } => "dataset_too_large",
            ExportError::Store(_) => "store_failure",
            ExportError::Internal(_) => "internal_error",
        }
    }

    fn body(&self) -> ErrorResponse {
        match self {
            // Store and internal details stay out of the response body.
            ExportError::Store(_) | ExportError::Internal(_) => {
                ErrorResponse::new("Internal server error")
            }
            ExportError::RateLimited {
                retry_after_secs, ..
            } => {
                let mut body = ErrorResponse::new(self.to_string());
                body.retry_after = Some(*retry_after_secs);
                body
            }
            ExportError::DatasetTooLarge {
                total_records,
                max_records,
            } => {
                let mut body = ErrorResponse::new(self.to_string());
                body.total_records = Some(*total_records);
                body.max_records = Some(*max_records);
                body
            }
            other => ErrorResponse::new(other.to_string()),
        }
    }
}

impl IntoResponse for ExportError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.body();
        let mut response = (status, Json(body)).into_response();

        if let ExportError::RateLimited {
            retry_after_secs,
            limit,
        } = &self
        {
            let reset = unix_now_secs() + retry_after_secs;
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, header_value(*retry_after_secs));
            headers.insert("x-ratelimit-limit", header_value(u64::from(*limit)));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            headers.insert("x-ratelimit-reset", header_value(reset));
        }

        response
    }
}

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn header_value(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("0"))
}
