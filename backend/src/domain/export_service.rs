//! Export orchestration.
//!
//! Drives one export request through its phases: authenticate, rate-limit,
//! feature/permission gate, validate, pre-flight count, then the batched
//! fetch-and-stream loop. Everything up to and including the count can still
//! reject the request with a structured error; the first streamed byte is the
//! point of no return, after which failures are logged and the connection is
//! dropped.
//!
//! The streaming loop feeds a bounded channel of capacity 1, so the next page
//! is not fetched from the store until the transport has accepted the
//! previous chunk. A slow client therefore costs one buffered batch of
//! memory, never the whole result set. A dropped client surfaces as a failed
//! send; that export is logged with `outcome=aborted`, which is deliberately
//! distinct from both `success` and `error`. A store failure mid-stream is
//! forwarded as a stream error so the transport tears the connection down
//! mid-body; a truncated export must never look like a complete one to the
//! client.

use axum::body::{Body, Bytes};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use shared::{AgeRange, ExportRequest};

use crate::auth::Identity;
use crate::config::ExportLimits;
use crate::domain::csv;
use crate::domain::rate_limiter::RateLimiter;
use crate::domain::validation::{self, ExportQuery};
use crate::error::ExportError;
use crate::storage::{AttendanceStore, DateRange};

/// A granted export: everything the HTTP layer needs to build the streamed
/// response.
pub struct ExportStream {
    /// Derived attachment name, `attendance-export-{start}-to-{end}.csv`
    pub filename: String,
    /// Rate-limit ceiling, echoed in `X-RateLimit-Limit`
    pub rate_limit: u32,
    /// Requests left in the caller's window, echoed in `X-RateLimit-Remaining`
    pub rate_limit_remaining: u32,
    pub body: Body,
}

// Manual impl: Body is not Debug, and the chunks are still in flight anyway.
impl std::fmt::Debug for ExportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportStream")
            .field("filename", &self.filename)
            .field("rate_limit", &self.rate_limit)
            .field("rate_limit_remaining", &self.rate_limit_remaining)
            .finish_non_exhaustive()
    }
}

/// Orchestrates attendance CSV exports.
#[derive(Clone)]
pub struct ExportService {
    store: Arc<dyn AttendanceStore>,
    rate_limiter: Arc<RateLimiter>,
    limits: ExportLimits,
    export_enabled: bool,
}

impl ExportService {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        rate_limiter: Arc<RateLimiter>,
        limits: ExportLimits,
        export_enabled: bool,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            limits,
            export_enabled,
        }
    }

    /// Run one export request through the pipeline.
    ///
    /// Every terminal outcome, including pre-flight rejections, is logged
    /// with the caller, duration, row count, and outcome classification.
    pub async fn export(
        &self,
        identity: Option<Identity>,
        request: ExportRequest,
    ) -> Result<ExportStream, ExportError> {
        let started = Instant::now();
        let user_label = identity
            .as_ref()
            .map(|id| id.user_id.clone())
            .unwrap_or_else(|| "anonymous".to_string());

        match self.preflight(identity, &request).await {
            Ok((identity, query, remaining, total_records)) => {
                info!(
                    user_id = %identity.user_id,
                    start_date = %query.start_date,
                    end_date = %query.end_date,
                    age_group = %query.age_group,
                    total_records,
                    "export request accepted"
                );
                Ok(self.start_stream(identity, query, remaining, started))
            }
            Err(err) => {
                warn!(
                    user_id = %user_label,
                    duration_ms = started.elapsed().as_millis() as u64,
                    row_count = 0u64,
                    outcome = err.outcome_label(),
                    "export rejected: {err}"
                );
                Err(err)
            }
        }
    }

    /// Phases that may still reject with a structured response.
    async fn preflight(
        &self,
        identity: Option<Identity>,
        request: &ExportRequest,
    ) -> Result<(Identity, ExportQuery, u32, u64), ExportError> {
        // Authenticating
        let identity = identity.ok_or(ExportError::Unauthenticated)?;

        // RateLimiting: counts the attempt even if validation later fails,
        // exactly like the fixed-window limiter in front of the original
        // route.
        let decision = self.rate_limiter.check_limit(&identity.user_id);
        if !decision.allowed {
            return Err(ExportError::RateLimited {
                retry_after_secs: decision.retry_after_secs.unwrap_or(60),
                limit: self.rate_limiter.max_requests(),
            });
        }

        if !self.export_enabled {
            return Err(ExportError::FeatureDisabled);
        }
        if !identity.can_export {
            return Err(ExportError::Forbidden);
        }

        // Validating
        let query = validation::validate(request, self.limits.max_date_range_days)?;

        // CountingRows
        let dates = DateRange {
            start: query.start_date,
            end: query.end_date,
        };
        let ages = query.age_group.age_range();
        let total_records = self
            .store
            .count(&dates, &ages)
            .await
            .map_err(|err| ExportError::Store(err.to_string()))?;

        if total_records > self.limits.max_records {
            return Err(ExportError::DatasetTooLarge {
                total_records,
                max_records: self.limits.max_records,
            });
        }

        Ok((identity, query, decision.remaining, total_records))
    }

    /// Streaming: spawn the batch loop and hand back the response body.
    fn start_stream(
        &self,
        identity: Identity,
        query: ExportQuery,
        remaining: u32,
        started: Instant,
    ) -> ExportStream {
        let filename = format!(
            "attendance-export-{}-to-{}.csv",
            query.start_date.format("%Y-%m-%d"),
            query.end_date.format("%Y-%m-%d"),
        );

        // Capacity 1 is the backpressure seam: a send completes only once
        // the transport has taken the previous chunk.
        let (tx, rx) = mpsc::channel::<Result<Bytes, axum::Error>>(1);

        let store = Arc::clone(&self.store);
        let batch_size = self.limits.batch_size;
        tokio::spawn(async move {
            let dates = DateRange {
                start: query.start_date,
                end: query.end_date,
            };
            let ages = query.age_group.age_range();
            let end = stream_batches(
                store,
                dates,
                ages,
                batch_size,
                query.include_headers,
                tx,
            )
            .await;

            let duration_ms = started.elapsed().as_millis() as u64;
            match end {
                StreamEnd::Completed { row_count } => info!(
                    user_id = %identity.user_id,
                    duration_ms,
                    row_count,
                    outcome = "success",
                    "export completed"
                ),
                StreamEnd::Aborted { row_count } => warn!(
                    user_id = %identity.user_id,
                    duration_ms,
                    row_count,
                    outcome = "aborted",
                    "client disconnected mid-export"
                ),
                StreamEnd::Failed { row_count, message } => error!(
                    user_id = %identity.user_id,
                    duration_ms,
                    row_count,
                    outcome = "error",
                    "export stream failed: {message}"
                ),
            }
        });

        let body = Body::from_stream(ReceiverStream::new(rx));

        ExportStream {
            filename,
            rate_limit: self.rate_limiter.max_requests(),
            rate_limit_remaining: remaining,
            body,
        }
    }
}

enum StreamEnd {
    Completed { row_count: u64 },
    Aborted { row_count: u64 },
    Failed { row_count: u64, message: String },
}

/// The batched fetch-format-emit loop.
///
/// Rows leave in `(date, student_name)` order because the store pages with a
/// stable total ordering and the offset only ever moves forward by one page.
/// A page shorter than `batch_size` signals exhaustion.
///
/// A fetch failure pushes an `Err` through the channel before giving up, so
/// the body stream errors and the connection dies mid-chunk rather than
/// presenting the truncated CSV as a cleanly terminated 200. Only a client
/// disconnect (the send side failing) ends with a plain drop.
async fn stream_batches(
    store: Arc<dyn AttendanceStore>,
    dates: DateRange,
    ages: AgeRange,
    batch_size: u32,
    include_headers: bool,
    tx: mpsc::Sender<Result<Bytes, axum::Error>>,
) -> StreamEnd {
    let mut preamble = String::from(csv::UTF8_BOM);
    if include_headers {
        preamble.push_str(&csv::header_row());
    }
    if tx.send(Ok(Bytes::from(preamble))).await.is_err() {
        return StreamEnd::Aborted { row_count: 0 };
    }

    let mut offset = 0u64;
    let mut row_count = 0u64;

    loop {
        let page = match store.fetch_page(&dates, &ages, offset, batch_size).await {
            Ok(page) => page,
            Err(err) => {
                let message = err.to_string();
                // The client may already be gone; the abort still stands.
                let _ = tx.send(Err(axum::Error::new(err))).await;
                return StreamEnd::Failed { row_count, message };
            }
        };
        if page.is_empty() {
            break;
        }

        let mut chunk = String::new();
        for row in &page {
            chunk.push_str(&csv::format_row(row));
        }
        if tx.send(Ok(Bytes::from(chunk))).await.is_err() {
            return StreamEnd::Aborted { row_count };
        }

        row_count += page.len() as u64;
        if (page.len() as u32) < batch_size {
            break;
        }
        offset += u64::from(batch_size);
    }

    StreamEnd::Completed { row_count }
}
