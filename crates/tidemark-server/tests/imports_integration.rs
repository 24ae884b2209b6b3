use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use chrono::{Datelike, Duration as ChronoDuration, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tower::ServiceExt;

use tidemark_core::billing::MonthKey;
use tidemark_core::config::{AppMode, Config, ImportLimits};
use tidemark_core::event::{CanonicalEvent, EventType};
use tidemark_core::import::{
    ChunkMessage, ImportJob, ImportSource, ImportStatus, NewImportJob, ParseImportJob,
};
use tidemark_duckdb::DuckDbBackend;
use tidemark_server::app::build_app;
use tidemark_server::import::mappers::{SimpleAnalyticsMapper, SourceMapper, UmamiMapper};
use tidemark_server::import::worker::INTERRUPTED_MESSAGE;
use tidemark_server::queue::{JobHandler, JobQueue, WorkOptions, INSERT_QUEUE};
use tidemark_server::state::AppState;
use tidemark_server::storage::import_location;

const BOUNDARY: &str = "tidemark-test-boundary";

fn test_config(storage_dir: &Path, limits: ImportLimits) -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/tidemark-test".to_string(),
        cors_origins: vec![],
        duckdb_memory_limit: "1GB".to_string(),
        mode: AppMode::Cloud,
        import: ImportLimits {
            storage_dir: storage_dir.to_string_lossy().into_owned(),
            ..limits
        },
    }
}

/// One organization with two current-billing sites.
async fn backend(plan: &str, monthly_limit: Option<u64>) -> DuckDbBackend {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    seed(&db, plan, monthly_limit).await;
    db
}

async fn seed(db: &DuckDbBackend, plan: &str, monthly_limit: Option<u64>) {
    db.seed_organization("org_test", plan, monthly_limit, false)
        .await
        .expect("seed organization");
    db.seed_site("site_a", "org_test", "example.com", false)
        .await
        .expect("seed site a");
    db.seed_site("site_b", "org_test", "shop.example.com", false)
        .await
        .expect("seed site b");
}

/// Full stack with the in-process queue and both workers attached.
async fn setup(
    plan: &str,
    monthly_limit: Option<u64>,
    limits: ImportLimits,
) -> (Arc<AppState>, axum::Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = backend(plan, monthly_limit).await;
    let state = Arc::new(AppState::new(db, test_config(dir.path(), limits)));
    state.start_workers().await.expect("start workers");
    let app = build_app(Arc::clone(&state));
    (state, app, dir)
}

/// Captures every message instead of delivering it.
#[derive(Default)]
struct RecordingQueue {
    sent: StdMutex<Vec<(String, Value)>>,
}

impl RecordingQueue {
    fn chunks(&self) -> Vec<ChunkMessage> {
        self.sent
            .lock()
            .expect("lock sent")
            .iter()
            .filter(|(queue, _)| queue == INSERT_QUEUE)
            .map(|(_, payload)| serde_json::from_value(payload.clone()).expect("chunk message"))
            .collect()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn send(&self, queue: &str, payload: Value) -> anyhow::Result<()> {
        self.sent
            .lock()
            .expect("lock sent")
            .push((queue.to_string(), payload));
        Ok(())
    }

    async fn work(
        &self,
        _queue: &str,
        _options: WorkOptions,
        _handler: Arc<dyn JobHandler>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// State whose chunk messages are recorded; the worker is driven directly.
async fn setup_recording(
    plan: &str,
    monthly_limit: Option<u64>,
    limits: ImportLimits,
) -> (Arc<AppState>, Arc<RecordingQueue>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = backend(plan, monthly_limit).await;
    let queue = Arc::new(RecordingQueue::default());
    let state = AppState::new(db, test_config(dir.path(), limits)).with_queue(queue.clone());
    (Arc::new(state), queue, dir)
}

fn recent(days_ago: i64) -> String {
    (Utc::now() - ChronoDuration::days(days_ago))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn start_of_current_month() -> String {
    let now = Utc::now();
    format!("{:04}-{:02}-01 00:00:00", now.year(), now.month())
}

fn umami_row(created_at: &str) -> Vec<(&'static str, String)> {
    vec![
        ("session_id", uuid::Uuid::new_v4().to_string()),
        ("hostname", "example.com".to_string()),
        ("url_path", "/pricing".to_string()),
        ("browser", "firefox".to_string()),
        ("os", "Linux".to_string()),
        ("screen", "1280x800".to_string()),
        ("country", "DE".to_string()),
        ("event_type", "1".to_string()),
        ("created_at", created_at.to_string()),
    ]
}

fn to_csv(headers: &[&str], rows: &[Vec<(&'static str, String)>]) -> String {
    let mut out = headers.join(",");
    out.push('\n');
    for row in rows {
        let line: Vec<String> = headers
            .iter()
            .map(|h| {
                row.iter()
                    .find(|(k, _)| k == h)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            })
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn umami_csv(rows: &[Vec<(&'static str, String)>]) -> String {
    to_csv(&UmamiMapper.expected_headers(), rows)
}

fn upload_request(site_id: &str, fields: &[(&str, &str)], csv: Option<&str>) -> Request<Body> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    if let Some(csv) = csv {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"export.csv\"\r\nContent-Type: text/csv\r\n\r\n{csv}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::builder()
        .method("POST")
        .uri(format!("/api/sites/{site_id}/imports"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("build request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

async fn wait_for_terminal(state: &AppState, import_id: &str) -> ImportJob {
    for _ in 0..500 {
        if let Some(job) = state
            .ledger
            .get_import_job(import_id)
            .await
            .expect("get import job")
        {
            if job.status.is_terminal() {
                return job;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("import {import_id} did not finish");
}

async fn wait_for_event_count(state: &AppState, import_id: &str, expected: u64) {
    for _ in 0..500 {
        let count = state
            .db
            .count_import_events(import_id)
            .await
            .expect("count events");
        if count == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("import {import_id} never reached {expected} stored events");
}

/// Create the job, store the file, and run the parse worker inline.
async fn run_import(
    state: &AppState,
    site_id: &str,
    source: ImportSource,
    csv: String,
    dates: (Option<chrono::NaiveDate>, Option<chrono::NaiveDate>),
) -> String {
    let import_id = format!("imp_{}", uuid::Uuid::new_v4().simple());
    let admission = state
        .ledger
        .create_import_job_atomic(
            &NewImportJob {
                id: import_id.clone(),
                site_id: site_id.to_string(),
                organization_id: "org_test".to_string(),
                source,
                file_name: "export.csv".to_string(),
            },
            state.config.import.max_concurrent_per_org,
        )
        .await
        .expect("create job");
    assert!(admission.success, "{:?}", admission.reason);

    let location = import_location(site_id, &import_id);
    state
        .storage
        .store(&location, Bytes::from(csv))
        .await
        .expect("store file");

    state
        .import_worker()
        .process(ParseImportJob {
            import_id: import_id.clone(),
            site_id: site_id.to_string(),
            organization_id: "org_test".to_string(),
            source,
            storage_location: location,
            start_date: dates.0,
            end_date: dates.1,
        })
        .await
        .expect("process job");
    import_id
}

async fn job(state: &AppState, import_id: &str) -> ImportJob {
    state
        .ledger
        .get_import_job(import_id)
        .await
        .expect("get job")
        .expect("job exists")
}

fn stored_event(site_id: &str, timestamp: &str) -> CanonicalEvent {
    CanonicalEvent {
        site_id: site_id.to_string(),
        timestamp: timestamp.to_string(),
        session_id: "s".to_string(),
        user_id: "u".to_string(),
        hostname: "example.com".to_string(),
        pathname: "/".to_string(),
        querystring: String::new(),
        url_parameters: BTreeMap::new(),
        page_title: String::new(),
        referrer: String::new(),
        channel: "Direct".to_string(),
        browser: String::new(),
        browser_version: String::new(),
        operating_system: String::new(),
        operating_system_version: String::new(),
        language: String::new(),
        country: String::new(),
        region: String::new(),
        city: String::new(),
        screen_width: 0,
        screen_height: 0,
        device_type: "Desktop".to_string(),
        event_type: EventType::Pageview,
        event_name: String::new(),
        props: serde_json::Map::new(),
        import_id: String::new(),
    }
}

/// One billable event in every month of a six-month window.
async fn fill_quota_window(state: &AppState) {
    let current = MonthKey::of(&Utc::now());
    let events: Vec<CanonicalEvent> = (0..=6)
        .map(|back| {
            let month = current.minus_months(back);
            let ts = format!("{:04}-{:02}-01 00:00:00", month.year(), month.month());
            stored_event("site_b", &ts)
        })
        .collect();
    state.warehouse.insert_events(&events).await.expect("seed usage");
}

// ============================================================
// Upload → parse → insert, end to end
// ============================================================
#[tokio::test]
async fn test_umami_upload_with_missing_timestamp_completes() {
    let (state, app, dir) = setup("pro", None, ImportLimits::default()).await;
    let csv = umami_csv(&[umami_row(&recent(3)), umami_row(""), umami_row(&recent(2))]);

    let response = app
        .clone()
        .oneshot(upload_request("site_a", &[("source", "umami")], Some(&csv)))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let import_id = json_body(response).await["importId"]
        .as_str()
        .expect("importId")
        .to_string();

    let finished = wait_for_terminal(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Completed);
    assert_eq!(finished.progress.accepted_events, 2);
    assert_eq!(finished.progress.skipped_invalid_timestamp, 1);
    assert_eq!(finished.error_message, None);

    wait_for_event_count(&state, &import_id, 2).await;
    assert!(!dir
        .path()
        .join(import_location("site_a", &import_id))
        .exists());

    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/imports/{import_id}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["status"], "completed");
    assert_eq!(json["data"]["accepted_events"], 2);
    assert_eq!(json["data"]["source"], "umami");
}

// ============================================================
// Quota exhaustion
// ============================================================
#[tokio::test]
async fn test_import_into_full_quota_fails_with_quota_message() {
    let (state, _queue, _dir) = setup_recording("free", Some(1), ImportLimits::default()).await;
    fill_quota_window(&state).await;

    let csv = umami_csv(&[
        umami_row(&start_of_current_month()),
        umami_row(&start_of_current_month()),
    ]);
    let import_id = run_import(&state, "site_a", ImportSource::Umami, csv, (None, None)).await;

    let finished = job(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Failed);
    assert_eq!(finished.progress.accepted_events, 0);
    assert_eq!(finished.progress.skipped_quota, 2);
    let message = finished.error_message.expect("failure message");
    assert!(message.to_lowercase().contains("quota"), "{message}");
}

#[tokio::test]
async fn test_upload_rejected_when_quota_window_is_full() {
    let (state, app, dir) = setup("free", Some(1), ImportLimits::default()).await;
    fill_quota_window(&state).await;

    let csv = umami_csv(&[umami_row(&recent(1))]);
    let response = app
        .oneshot(upload_request("site_a", &[("source", "umami")], Some(&csv)))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "quota_exhausted");

    assert!(state
        .ledger
        .list_import_jobs("site_a")
        .await
        .expect("list")
        .is_empty());
    assert!(!dir.path().join("site_a").exists());
}

// ============================================================
// Concurrency limit
// ============================================================
#[tokio::test]
async fn test_concurrent_uploads_for_one_organization_admit_exactly_one() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = backend("pro", None).await;
    // No workers: the admitted job stays pending.
    let state = Arc::new(AppState::new(
        db,
        test_config(dir.path(), ImportLimits::default()),
    ));
    let app = build_app(Arc::clone(&state));
    let csv = umami_csv(&[umami_row(&recent(1))]);

    let (first, second) = tokio::join!(
        app.clone()
            .oneshot(upload_request("site_a", &[("source", "umami")], Some(&csv))),
        app.clone()
            .oneshot(upload_request("site_b", &[("source", "umami")], Some(&csv))),
    );
    let mut statuses = vec![
        first.expect("request").status(),
        second.expect("request").status(),
    ];
    statuses.sort();
    assert_eq!(
        statuses,
        vec![StatusCode::ACCEPTED, StatusCode::TOO_MANY_REQUESTS]
    );
    assert_eq!(
        state
            .ledger
            .count_active_imports("org_test")
            .await
            .expect("count"),
        1
    );

    let response = app
        .oneshot(upload_request("site_a", &[("source", "umami")], Some(&csv)))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "import_in_progress");
}

// ============================================================
// Chunking
// ============================================================
#[tokio::test]
async fn test_twelve_thousand_rows_emit_three_chunks_then_terminal() {
    let (state, queue, _dir) = setup_recording("pro", None, ImportLimits::default()).await;
    let ts = recent(1);
    let rows: Vec<_> = (0..12_000).map(|_| umami_row(&ts)).collect();
    let import_id = run_import(
        &state,
        "site_a",
        ImportSource::Umami,
        umami_csv(&rows),
        (None, None),
    )
    .await;

    let chunks = queue.chunks();
    let sizes: Vec<usize> = chunks.iter().map(|c| c.chunk.len()).collect();
    assert_eq!(sizes, vec![5000, 5000, 2000, 0]);
    assert_eq!(
        chunks.iter().map(|c| c.chunk_number).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(chunks[..3].iter().all(|c| !c.all_chunks_sent && c.total_chunks.is_none()));
    let terminal = chunks.last().expect("terminal message");
    assert!(terminal.all_chunks_sent);
    assert_eq!(terminal.total_chunks, Some(3));
    assert!(chunks.iter().all(|c| c.import_id == import_id && c.site == "site_a"));

    let finished = job(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Completed);
    assert_eq!(finished.progress.accepted_events, 12_000);
}

#[tokio::test]
async fn test_redelivered_parse_job_is_skipped_once_finished() {
    let (state, queue, _dir) = setup_recording("pro", None, ImportLimits::default()).await;
    let csv = umami_csv(&[umami_row(&recent(1))]);
    let import_id = run_import(&state, "site_a", ImportSource::Umami, csv, (None, None)).await;
    assert_eq!(queue.chunks().len(), 2);

    state
        .import_worker()
        .process(ParseImportJob {
            import_id: import_id.clone(),
            site_id: "site_a".to_string(),
            organization_id: "org_test".to_string(),
            source: ImportSource::Umami,
            storage_location: import_location("site_a", &import_id),
            start_date: None,
            end_date: None,
        })
        .await
        .expect("process redelivery");

    assert_eq!(queue.chunks().len(), 2);
    assert_eq!(job(&state, &import_id).await.status, ImportStatus::Completed);
}

// ============================================================
// Resource bounds and infrastructure failures
// ============================================================
#[tokio::test]
async fn test_row_cap_fails_the_job_and_removes_the_file() {
    let limits = ImportLimits {
        max_rows: 2,
        ..ImportLimits::default()
    };
    let (state, _queue, dir) = setup_recording("pro", None, limits).await;
    let ts = recent(1);
    let csv = umami_csv(&[umami_row(&ts), umami_row(&ts), umami_row(&ts)]);
    let import_id = run_import(&state, "site_a", ImportSource::Umami, csv, (None, None)).await;

    let finished = job(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Failed);
    assert!(finished
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("maximum of 2 rows")));
    assert!(!dir
        .path()
        .join(import_location("site_a", &import_id))
        .exists());
}

#[tokio::test]
async fn test_deadline_fails_the_job() {
    let limits = ImportLimits {
        timeout_secs: 0,
        ..ImportLimits::default()
    };
    let (state, queue, _dir) = setup_recording("pro", None, limits).await;
    let csv = umami_csv(&[umami_row(&recent(1))]);
    let import_id = run_import(&state, "site_a", ImportSource::Umami, csv, (None, None)).await;

    let finished = job(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Failed);
    assert!(finished
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("timed out")));
    assert!(queue.chunks().iter().all(|c| !c.all_chunks_sent));
}

#[tokio::test]
async fn test_missing_stored_file_fails_without_leaking_paths() {
    let (state, _queue, dir) = setup_recording("pro", None, ImportLimits::default()).await;
    let import_id = "imp_missing_file".to_string();
    state
        .ledger
        .create_import_job_atomic(
            &NewImportJob {
                id: import_id.clone(),
                site_id: "site_a".to_string(),
                organization_id: "org_test".to_string(),
                source: ImportSource::Umami,
                file_name: "export.csv".to_string(),
            },
            1,
        )
        .await
        .expect("create job");

    state
        .import_worker()
        .process(ParseImportJob {
            import_id: import_id.clone(),
            site_id: "site_a".to_string(),
            organization_id: "org_test".to_string(),
            source: ImportSource::Umami,
            storage_location: import_location("site_a", &import_id),
            start_date: None,
            end_date: None,
        })
        .await
        .expect("worker survives");

    let finished = job(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Failed);
    let message = finished.error_message.expect("failure message");
    assert!(message.len() <= 500);
    let root = dir.path().to_string_lossy().into_owned();
    assert!(!message.contains(&root), "{message}");
}

// ============================================================
// Row filtering
// ============================================================
#[tokio::test]
async fn test_date_range_filter_is_inclusive_and_counted() {
    let (state, _queue, _dir) = setup_recording("pro", None, ImportLimits::default()).await;
    let day = |days_ago: i64| (Utc::now() - ChronoDuration::days(days_ago)).date_naive();
    let csv = umami_csv(&[
        umami_row(&recent(10)),
        umami_row(&recent(5)),
        umami_row(&recent(2)),
    ]);
    let import_id = run_import(
        &state,
        "site_a",
        ImportSource::Umami,
        csv,
        (Some(day(5)), Some(day(2))),
    )
    .await;

    let finished = job(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Completed);
    assert_eq!(finished.progress.accepted_events, 2);
    assert_eq!(finished.progress.filtered_out_of_range, 1);
}

#[tokio::test]
async fn test_simple_analytics_rows_are_mapped_and_robots_dropped() {
    let (state, queue, _dir) = setup_recording("pro", None, ImportLimits::default()).await;
    let iso = (Utc::now() - ChronoDuration::days(1))
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string();
    let row = |datapoint: &str, robot: &str| -> Vec<(&'static str, String)> {
        vec![
            ("added_iso", iso.clone()),
            ("datapoint", datapoint.to_string()),
            ("hostname", "example.com".to_string()),
            ("path", "/blog".to_string()),
            ("session_id", uuid::Uuid::new_v4().to_string()),
            ("uuid", uuid::Uuid::new_v4().to_string()),
            ("is_robot", robot.to_string()),
        ]
    };
    let csv = to_csv(
        &SimpleAnalyticsMapper.expected_headers(),
        &[
            row("pageview", "false"),
            row("newsletter_signup", "false"),
            row("pageview", "true"),
        ],
    );
    let import_id = run_import(
        &state,
        "site_a",
        ImportSource::SimpleAnalytics,
        csv,
        (None, None),
    )
    .await;

    let finished = job(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Completed);
    assert_eq!(finished.progress.accepted_events, 2);
    assert_eq!(finished.progress.invalid_rows, 1);

    let events: Vec<CanonicalEvent> = queue
        .chunks()
        .into_iter()
        .flat_map(|c| c.chunk)
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::Pageview);
    assert_eq!(events[1].event_type, EventType::CustomEvent);
    assert_eq!(events[1].event_name, "newsletter_signup");
    assert!(events.iter().all(CanonicalEvent::has_consistent_name));
}

// ============================================================
// Upload validation
// ============================================================
#[tokio::test]
async fn test_upload_validation_errors() {
    let (_state, app, _dir) = setup("pro", None, ImportLimits::default()).await;
    let csv = umami_csv(&[umami_row(&recent(1))]);

    let response = app
        .clone()
        .oneshot(upload_request("site_missing", &[("source", "umami")], Some(&csv)))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let cases: [(&[(&str, &str)], Option<&str>, &str); 4] = [
        (&[], Some(&csv), "source"),
        (&[("source", "matomo")], Some(&csv), "source"),
        (&[("source", "umami")], None, "file"),
        (
            &[("source", "umami"), ("startDate", "03/01/2024")],
            Some(&csv),
            "startDate",
        ),
    ];
    for (fields, file, field) in cases {
        let response = app
            .clone()
            .oneshot(upload_request("site_a", fields, file))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{field}");
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "validation_error");
        assert_eq!(json["error"]["field"], field);
    }
}

// ============================================================
// Listing and deletion
// ============================================================
#[tokio::test]
async fn test_list_and_delete_imports() {
    let (state, app, _dir) = setup("pro", None, ImportLimits::default()).await;
    let csv = umami_csv(&[umami_row(&recent(2)), umami_row(&recent(1))]);

    let response = app
        .clone()
        .oneshot(upload_request("site_a", &[("source", "umami")], Some(&csv)))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let import_id = json_body(response).await["importId"]
        .as_str()
        .expect("importId")
        .to_string();
    wait_for_terminal(&state, &import_id).await;
    wait_for_event_count(&state, &import_id, 2).await;

    let response = app
        .clone()
        .oneshot(get_request("/api/sites/site_a/imports"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["data"][0]["id"], import_id.as_str());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/sites/site_b/imports/{import_id}"))
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/sites/site_a/imports/{import_id}"))
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["eventsRemoved"], 2);

    let response = app
        .oneshot(get_request(&format!("/api/imports/{import_id}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleting_a_pending_import_conflicts() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = backend("pro", None).await;
    let state = Arc::new(AppState::new(
        db,
        test_config(dir.path(), ImportLimits::default()),
    ));
    let app = build_app(Arc::clone(&state));
    state
        .ledger
        .create_import_job_atomic(
            &NewImportJob {
                id: "imp_pending".to_string(),
                site_id: "site_a".to_string(),
                organization_id: "org_test".to_string(),
                source: ImportSource::Umami,
                file_name: "export.csv".to_string(),
            },
            1,
        )
        .await
        .expect("create job");

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/sites/site_a/imports/imp_pending")
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_rows_dropped_by_the_mapper_still_consume_quota() {
    let (state, queue, _dir) = setup_recording("free", Some(1), ImportLimits::default()).await;
    let ts = start_of_current_month();
    let mut broken = umami_row(&ts);
    broken.retain(|(k, _)| *k != "session_id");
    broken.push(("session_id", "not-a-uuid".to_string()));
    let csv = umami_csv(&[broken, umami_row(&ts)]);

    let import_id = run_import(&state, "site_a", ImportSource::Umami, csv, (None, None)).await;

    let finished = job(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Failed);
    assert_eq!(finished.progress.invalid_rows, 1);
    assert_eq!(finished.progress.skipped_quota, 1);
    assert_eq!(finished.progress.accepted_events, 0);
    assert!(queue.chunks().is_empty());
}

// ============================================================
// Restart recovery
// ============================================================
#[tokio::test]
async fn test_restart_fails_interrupted_imports_and_frees_the_slot() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("tidemark.db");
    let db_path = db_path.to_str().expect("utf-8 path");
    let storage_dir = dir.path().join("imports");
    let orphan_file = storage_dir.join(import_location("site_a", "imp_orphan"));

    {
        let db = DuckDbBackend::open(db_path, "1GB").expect("file DuckDB");
        seed(&db, "pro", None).await;
        let admission = db
            .create_import_job_atomic(
                &NewImportJob {
                    id: "imp_orphan".to_string(),
                    site_id: "site_a".to_string(),
                    organization_id: "org_test".to_string(),
                    source: ImportSource::Umami,
                    file_name: "export.csv".to_string(),
                },
                1,
            )
            .await
            .expect("create job");
        assert!(admission.success);
        std::fs::create_dir_all(orphan_file.parent().expect("parent")).expect("mkdir");
        std::fs::write(&orphan_file, "session_id\n").expect("write upload");
    }

    let db = DuckDbBackend::open(db_path, "1GB").expect("reopen DuckDB");
    let state = Arc::new(AppState::new(
        db,
        test_config(&storage_dir, ImportLimits::default()),
    ));
    state.start_workers().await.expect("start workers");
    let app = build_app(Arc::clone(&state));

    let orphan = job(&state, "imp_orphan").await;
    assert_eq!(orphan.status, ImportStatus::Failed);
    assert_eq!(orphan.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    assert!(!orphan_file.exists());

    let csv = umami_csv(&[umami_row(&recent(1))]);
    let response = app
        .oneshot(upload_request("site_a", &[("source", "umami")], Some(&csv)))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let import_id = json_body(response).await["importId"]
        .as_str()
        .expect("importId")
        .to_string();
    let finished = wait_for_terminal(&state, &import_id).await;
    assert_eq!(finished.status, ImportStatus::Completed);
}
