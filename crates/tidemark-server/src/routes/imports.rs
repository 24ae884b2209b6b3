use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

use tidemark_core::import::{
    ImportDeletion, ImportSource, ImportStatus, NewImportJob, ParseImportJob,
};

use crate::queue::PARSE_QUEUE;
use crate::storage::import_location;
use crate::{error::AppError, state::AppState};

const MAX_FILE_NAME_CHARS: usize = 255;

/// Validated multipart form of an upload.
#[derive(Debug)]
struct ImportUpload {
    file_name: String,
    data: Bytes,
    source: ImportSource,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(format!("invalid multipart body: {}", e.body_text()))
    }
}

fn parse_date(field: &'static str, raw: &str) -> Result<Option<NaiveDate>, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| AppError::InvalidField {
            field,
            message: format!("{field} must be formatted as yyyy-MM-dd"),
        })
}

/// Keep only the final path segment of a client-supplied file name.
fn clean_file_name(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let name: String = name.chars().take(MAX_FILE_NAME_CHARS).collect();
    if name.is_empty() {
        "import.csv".to_string()
    } else {
        name
    }
}

async fn read_upload(multipart: &mut Multipart) -> Result<ImportUpload, AppError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut source: Option<String> = None;
    let mut start_date = None;
    let mut end_date = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let name = clean_file_name(field.file_name().unwrap_or_default());
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((name, data));
            }
            "source" => source = Some(field.text().await.map_err(multipart_error)?),
            "startDate" => {
                start_date = parse_date("startDate", &field.text().await.map_err(multipart_error)?)?
            }
            "endDate" => {
                end_date = parse_date("endDate", &field.text().await.map_err(multipart_error)?)?
            }
            _ => {}
        }
    }

    let (file_name, data) = file.ok_or_else(|| AppError::InvalidField {
        field: "file",
        message: "file is required".to_string(),
    })?;
    if data.is_empty() {
        return Err(AppError::InvalidField {
            field: "file",
            message: "file is empty".to_string(),
        });
    }
    let source = source
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidField {
            field: "source",
            message: "source is required".to_string(),
        })?
        .parse::<ImportSource>()
        .map_err(|e| AppError::InvalidField {
            field: "source",
            message: e.to_string(),
        })?;
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            return Err(AppError::InvalidField {
                field: "endDate",
                message: "endDate must be on or after startDate".to_string(),
            });
        }
    }

    Ok(ImportUpload {
        file_name,
        data,
        source,
        start_date,
        end_date,
    })
}

/// `POST /api/sites/{site_id}/imports`: accept an export file for import.
///
/// Order matters: every rejection happens before the file is stored, and the
/// job row exists before the parse job is enqueued.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_import(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let admission = state.admission();

    let check = admission.check_concurrent_limit(&site_id).await?;
    if !check.allowed {
        return Err(AppError::ConcurrencyLimit(
            check.reason.unwrap_or_default(),
        ));
    }

    let upload = read_upload(&mut multipart).await?;

    if let Some(summary) = admission.check_quota_headroom(&check.organization_id).await? {
        return Err(AppError::QuotaExhausted(summary));
    }

    let import_id = format!("imp_{}", uuid::Uuid::new_v4().simple());
    let job = NewImportJob {
        id: import_id.clone(),
        site_id: site_id.clone(),
        organization_id: check.organization_id.clone(),
        source: upload.source,
        file_name: upload.file_name.clone(),
    };
    let admitted = admission.create_job_atomic(&job).await?;
    if !admitted.success {
        return Err(AppError::ConcurrencyLimit(
            admitted.reason.unwrap_or_default(),
        ));
    }

    let location = import_location(&site_id, &import_id);
    let bytes = upload.data.len();
    if let Err(e) = state.storage.store(&location, upload.data).await {
        fail_job(&state, &import_id, "Failed to store uploaded file").await;
        return Err(AppError::Internal(e));
    }

    let payload = serde_json::to_value(ParseImportJob {
        import_id: import_id.clone(),
        site_id: site_id.clone(),
        organization_id: check.organization_id,
        source: upload.source,
        storage_location: location.clone(),
        start_date: upload.start_date,
        end_date: upload.end_date,
    })
    .map_err(anyhow::Error::from)?;
    if let Err(e) = state.queue.send(PARSE_QUEUE, payload).await {
        fail_job(&state, &import_id, "Failed to queue import").await;
        let outcome = state.storage.delete(&location).await;
        if !outcome.success {
            warn!(%import_id, error = ?outcome.error, "Failed to delete orphaned upload");
        }
        return Err(AppError::Internal(e));
    }

    info!(%import_id, source = %upload.source, bytes, "Import accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "importId": import_id })),
    ))
}

async fn fail_job(state: &AppState, import_id: &str, message: &str) {
    if let Err(e) = state
        .ledger
        .update_status(import_id, ImportStatus::Failed, Some(message))
        .await
    {
        warn!(import_id, error = %e, "Failed to mark import as failed");
    }
}

/// `GET /api/imports/{import_id}`: status and counters of one job.
#[tracing::instrument(skip(state))]
pub async fn get_import(
    State(state): State<Arc<AppState>>,
    Path(import_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let job = state
        .ledger
        .get_import_job(&import_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Import not found".to_string()))?;
    Ok(Json(json!({ "data": job })))
}

/// `GET /api/sites/{site_id}/imports`: every job of a site, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_imports(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if state.ledger.organization_for_site(&site_id).await?.is_none() {
        return Err(AppError::NotFound("Site not found".to_string()));
    }
    let jobs = state.ledger.list_import_jobs(&site_id).await?;
    Ok(Json(json!({ "data": jobs })))
}

/// `DELETE /api/sites/{site_id}/imports/{import_id}`: remove a finished
/// import and the events it produced.
#[tracing::instrument(skip(state))]
pub async fn delete_import(
    State(state): State<Arc<AppState>>,
    Path((site_id, import_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let belongs_to_site = state
        .ledger
        .get_import_job(&import_id)
        .await?
        .is_some_and(|job| job.site_id == site_id);
    if !belongs_to_site {
        return Err(AppError::NotFound("Import not found".to_string()));
    }

    match state.ledger.delete_import(&import_id).await? {
        ImportDeletion::NotFound => Err(AppError::NotFound("Import not found".to_string())),
        ImportDeletion::StillActive => Err(AppError::Conflict(
            "Import is still running and cannot be deleted".to_string(),
        )),
        ImportDeletion::Deleted { events_removed } => {
            info!(%import_id, events_removed, "Import deleted");
            Ok(Json(json!({ "data": { "eventsRemoved": events_removed } })))
        }
    }
}
