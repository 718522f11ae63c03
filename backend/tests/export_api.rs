//! End-to-end contract tests for the export endpoint, driven through the
//! real router with `tower::ServiceExt::oneshot`.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{NaiveDate, NaiveDateTime};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use attendance_tracker_backend::auth::HeaderAuth;
use attendance_tracker_backend::config::ExportLimits;
use attendance_tracker_backend::domain::{ExportService, RateLimiter};
use attendance_tracker_backend::rest::{self, AppState};
use attendance_tracker_backend::storage::{
    AttendanceRow, AttendanceStore, DateRange, SqliteAttendanceStore,
};
use shared::AgeRange;

/// Store stub with a fixed row set and an optional count override, so the
/// pre-flight ceiling can be tested without materializing 60k rows.
struct StubStore {
    rows: Vec<AttendanceRow>,
    count_override: Option<u64>,
}

#[async_trait]
impl AttendanceStore for StubStore {
    async fn count(&self, _dates: &DateRange, _ages: &AgeRange) -> Result<u64> {
        Ok(self.count_override.unwrap_or(self.rows.len() as u64))
    }

    async fn fetch_page(
        &self,
        _dates: &DateRange,
        _ages: &AgeRange,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<AttendanceRow>> {
        Ok(self
            .rows
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

fn sample_rows(n: usize) -> Vec<AttendanceRow> {
    (0..n)
        .map(|i| AttendanceRow {
            date: NaiveDate::from_ymd_opt(2024, 1, 1 + (i % 28) as u32).unwrap(),
            student_name: format!("Student {i:03}"),
            age_group: "6-9yrs".to_string(),
            present: true,
            check_in_time: NaiveDateTime::parse_from_str(
                "2024-01-01 09:30:00",
                "%Y-%m-%d %H:%M:%S",
            )
            .ok(),
            is_visitor: false,
        })
        .collect()
}

fn sorted(mut rows: Vec<AttendanceRow>) -> Vec<AttendanceRow> {
    rows.sort_by(|a, b| (a.date, a.student_name.clone()).cmp(&(b.date, b.student_name.clone())));
    rows
}

struct TestApp {
    router: Router,
    rate_limiter: Arc<RateLimiter>,
}

fn app_with(store: StubStore, max_requests: u32, export_enabled: bool) -> TestApp {
    let rate_limiter = Arc::new(RateLimiter::new(max_requests, Duration::from_secs(3600)));
    let export_service = ExportService::new(
        Arc::new(StubStore {
            rows: sorted(store.rows),
            count_override: store.count_override,
        }),
        Arc::clone(&rate_limiter),
        ExportLimits::default(),
        export_enabled,
    );
    let state = AppState::new(export_service, Arc::clone(&rate_limiter), Arc::new(HeaderAuth));
    TestApp {
        router: rest::router(state),
        rate_limiter,
    }
}

fn default_app(rows: Vec<AttendanceRow>) -> TestApp {
    app_with(
        StubStore {
            rows,
            count_override: None,
        },
        10,
        true,
    )
}

fn export_request(user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/attendance/export")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn january_body() -> Value {
    json!({"startDate": "2024-01-01", "endDate": "2024-01-31", "ageGroup": "all"})
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn exports_one_hundred_rows_as_streamed_csv() {
    let app = default_app(sample_rows(100));

    let response = app
        .router
        .oneshot(export_request(Some("u1"), january_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "text/csv; charset=utf-8"
    );
    assert_eq!(
        headers.get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"attendance-export-2024-01-01-to-2024-01-31.csv\""
    );
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "10");
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "9");

    let text = body_text(response).await;
    assert!(text.starts_with('\u{FEFF}'));
    let lines: Vec<&str> = text.trim_start_matches('\u{FEFF}').lines().collect();
    assert_eq!(
        lines[0],
        "Date,Student Name,Age Group,Status,Check-in Time,Visitor"
    );
    assert_eq!(lines.len(), 101);
    assert!(lines[1].ends_with("Present,9:30:00 AM,No"));
}

#[tokio::test]
async fn rows_stream_in_date_then_name_order() {
    let app = default_app(sample_rows(60));

    let response = app
        .router
        .oneshot(export_request(Some("u1"), january_body()))
        .await
        .unwrap();
    let text = body_text(response).await;

    let keys: Vec<(String, String)> = text
        .trim_start_matches('\u{FEFF}')
        .lines()
        .skip(1)
        .map(|line| {
            let mut fields = line.split(',');
            (
                fields.next().unwrap().to_string(),
                fields.next().unwrap().to_string(),
            )
        })
        .collect();

    let mut expected = keys.clone();
    expected.sort();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn fields_needing_quotes_are_escaped_end_to_end() {
    let mut rows = sample_rows(1);
    rows[0].student_name = "Doe, John".to_string();
    let app = default_app(rows);

    let response = app
        .router
        .oneshot(export_request(Some("u1"), january_body()))
        .await
        .unwrap();
    let text = body_text(response).await;
    assert!(text.contains("\"Doe, John\""));
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = default_app(sample_rows(1));

    let response = app
        .router
        .oneshot(export_request(None, january_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body, json!({"error": "Authentication required"}));
}

#[tokio::test]
async fn inverted_range_is_a_bad_request_with_exact_reason() {
    let app = default_app(sample_rows(1));

    let body = json!({"startDate": "2024-01-31", "endDate": "2024-01-01"});
    let response = app
        .router
        .oneshot(export_request(Some("u1"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "End date must be after start date");
}

#[tokio::test]
async fn empty_json_body_reports_missing_parameters() {
    let app = default_app(sample_rows(1));

    let response = app
        .router
        .oneshot(export_request(Some("u1"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(
        body["error"],
        "Missing required parameters: startDate and endDate"
    );
}

#[tokio::test]
async fn ninety_one_day_range_is_rejected() {
    let app = default_app(sample_rows(1));

    let body = json!({"startDate": "2024-01-01", "endDate": "2024-04-01"});
    let response = app
        .router
        .oneshot(export_request(Some("u1"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Date range cannot exceed 90 days");
}

#[tokio::test]
async fn oversized_count_is_payload_too_large_with_machine_fields() {
    let app = app_with(
        StubStore {
            rows: vec![],
            count_override: Some(60_000),
        },
        10,
        true,
    );

    let response = app
        .router
        .oneshot(export_request(Some("u1"), january_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["totalRecords"], 60_000);
    assert_eq!(body["maxRecords"], 50_000);
    assert_eq!(
        body["error"],
        "Dataset too large. Maximum 50000 records allowed. Found 60000 records."
    );
}

#[tokio::test]
async fn eleventh_request_is_rate_limited_with_headers() {
    let app = default_app(sample_rows(1));

    for _ in 0..10 {
        let response = app
            .router
            .clone()
            .oneshot(export_request(Some("u1"), january_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .router
        .oneshot(export_request(Some("u1"), january_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let headers = response.headers().clone();
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "10");
    assert!(headers.contains_key(header::RETRY_AFTER));
    assert!(headers.contains_key("x-ratelimit-reset"));

    let body = body_json(response).await;
    assert_eq!(body["error"], "Rate limit exceeded. Too many export requests.");
    assert!(body["retryAfter"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn one_users_quota_does_not_affect_another() {
    let app = app_with(
        StubStore {
            rows: sample_rows(1),
            count_override: None,
        },
        2,
        true,
    );

    for _ in 0..3 {
        let _ = app
            .router
            .clone()
            .oneshot(export_request(Some("u1"), january_body()))
            .await
            .unwrap();
    }

    let response = app
        .router
        .oneshot(export_request(Some("u2"), january_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn disabled_feature_is_forbidden() {
    let app = app_with(
        StubStore {
            rows: vec![],
            count_override: None,
        },
        10,
        false,
    );

    let response = app
        .router
        .oneshot(export_request(Some("u1"), january_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body, json!({"error": "Export feature is not enabled"}));
}

#[tokio::test]
async fn revoked_permission_is_forbidden() {
    let app = default_app(sample_rows(1));

    let mut request = export_request(Some("u1"), january_body());
    request
        .headers_mut()
        .insert("x-export-allowed", "false".parse().unwrap());

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body, json!({"error": "Forbidden"}));
}

#[tokio::test]
async fn stats_and_reset_endpoints_work() {
    let app = default_app(sample_rows(1));

    let _ = app
        .router
        .clone()
        .oneshot(export_request(Some("u1"), january_body()))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/attendance/export/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["totalUsers"], 1);
    assert_eq!(stats["activeUsers"], 1);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/attendance/export/reset-limit/u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.rate_limiter.stats().total_users, 0);
}

#[tokio::test]
async fn health_endpoint_responds() {
    let app = default_app(vec![]);
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Store whose page fetches start failing once the offset passes the first
/// page, emulating a database that dies mid-export.
struct FlakyStore {
    rows: Vec<AttendanceRow>,
}

#[async_trait]
impl AttendanceStore for FlakyStore {
    async fn count(&self, _dates: &DateRange, _ages: &AgeRange) -> Result<u64> {
        Ok(self.rows.len() as u64)
    }

    async fn fetch_page(
        &self,
        _dates: &DateRange,
        _ages: &AgeRange,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<AttendanceRow>> {
        if offset > 0 {
            anyhow::bail!("database connection lost");
        }
        Ok(self
            .rows
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[tokio::test]
async fn store_failure_mid_stream_is_not_a_clean_body() {
    let rate_limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(3600)));
    let export_service = ExportService::new(
        Arc::new(FlakyStore {
            rows: sorted(sample_rows(10)),
        }),
        Arc::clone(&rate_limiter),
        ExportLimits {
            batch_size: 4,
            ..ExportLimits::default()
        },
        true,
    );
    let state = AppState::new(export_service, rate_limiter, Arc::new(HeaderAuth));
    let router = rest::router(state);

    let response = router
        .oneshot(export_request(Some("u1"), january_body()))
        .await
        .unwrap();
    // Headers are committed before the failure; the abort shows up in the
    // body stream, which must error out instead of ending cleanly.
    assert_eq!(response.status(), StatusCode::OK);
    let collected = response.into_body().collect().await;
    assert!(
        collected.is_err(),
        "truncated export must not collect into a complete body"
    );
}

#[tokio::test]
async fn sqlite_backed_export_filters_by_age_group() {
    let store = SqliteAttendanceStore::connect_in_memory().await.unwrap();
    let ana = store.insert_kid("Ana", 4, false).await.unwrap();
    let ben = store.insert_kid("Ben", 7, false).await.unwrap();
    let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
    store.insert_attendance(ana, day, true, None).await.unwrap();
    store.insert_attendance(ben, day, true, None).await.unwrap();

    let rate_limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(3600)));
    let export_service = ExportService::new(
        Arc::new(store),
        Arc::clone(&rate_limiter),
        ExportLimits::default(),
        true,
    );
    let state = AppState::new(export_service, rate_limiter, Arc::new(HeaderAuth));
    let router = rest::router(state);

    let body = json!({"startDate": "2024-01-01", "endDate": "2024-01-31", "ageGroup": "2-5yrs"});
    let response = router
        .oneshot(export_request(Some("u1"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let text = body_text(response).await;
    let lines: Vec<&str> = text.trim_start_matches('\u{FEFF}').lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1], "2024-01-10,Ana,2-5yrs,Present,N/A,No");
}
