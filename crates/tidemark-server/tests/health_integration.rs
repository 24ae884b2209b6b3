use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use tidemark_core::config::{AppMode, Config, ImportLimits};
use tidemark_duckdb::DuckDbBackend;
use tidemark_server::app::build_app;
use tidemark_server::state::AppState;

fn test_config(import: ImportLimits) -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/tidemark-test".to_string(),
        cors_origins: vec![],
        duckdb_memory_limit: "1GB".to_string(),
        mode: AppMode::SelfHosted,
        import,
    }
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

// ============================================================
// Health check returns 200 when DB is reachable
// ============================================================
#[tokio::test]
async fn test_health_returns_200_when_db_reachable() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, test_config(ImportLimits::default())));
    let app = build_app(state);

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

// ============================================================
// Oversized uploads are refused before anything is stored
// ============================================================
#[tokio::test]
async fn test_oversized_upload_returns_413() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    db.seed_organization("org_test", "free", None, false)
        .await
        .expect("seed organization");
    db.seed_site("site_a", "org_test", "example.com", false)
        .await
        .expect("seed site");
    let limits = ImportLimits {
        max_upload_bytes: 16,
        storage_dir: dir.path().to_string_lossy().into_owned(),
        ..ImportLimits::default()
    };
    let state = Arc::new(AppState::new(db, test_config(limits)));
    let app = build_app(Arc::clone(&state));

    let boundary = "tidemark-test-boundary";
    let csv = "x".repeat(128 * 1024);
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"source\"\r\n\r\numami\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"big.csv\"\r\n\
         Content-Type: text/csv\r\n\r\n{csv}\r\n--{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/sites/site_a/imports")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(state
        .ledger
        .list_import_jobs("site_a")
        .await
        .expect("list")
        .is_empty());
}
