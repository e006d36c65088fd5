//! Plain CRUD/query handlers mounted alongside the streaming pipeline (§6).
//! None of these carry the concurrency or ordering complexity of the core
//! subsystem — they're direct translations of a Metadata Store (C5) or
//! Storage Adapter (C4) call into an HTTP response, per the SPEC_FULL.md
//! "ambient stack" section.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::{FileRecord, NewFileRecord};
use crate::error::AppError;
use crate::state::AppState;

const STORED_EXTENSION: &str = "csv";

fn has_csv_extension(filename: &str) -> bool {
    filename
        .rsplit('.')
        .next()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub file_id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_size: i64,
    pub file_path: String,
}

/// `POST /api/files/upload`: validate, store, and record a file with no
/// analysis — the non-streaming sibling of the SSE pipeline's phases 1-6.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {e}")))?
        .ok_or_else(|| AppError::Validation("missing file field".to_string()))?;

    let original_filename = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation("missing filename".to_string()))?;

    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    if !has_csv_extension(&original_filename) {
        return Err(AppError::Validation(
            "only .csv files are accepted".to_string(),
        ));
    }

    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::Validation(format!("failed to read upload: {e}")))?;

    if bytes.len() as u64 > state.config.max_file_size {
        return Err(AppError::Validation(
            "file exceeds the configured size limit".to_string(),
        ));
    }

    let (stored_filename, absolute_path) = state.storage.write(&bytes, STORED_EXTENSION).await?;

    let draft = NewFileRecord {
        original_filename: original_filename.clone(),
        stored_filename: stored_filename.clone(),
        file_path: absolute_path.to_string_lossy().to_string(),
        file_size: bytes.len() as i64,
        content_type,
    };
    let record = match state.db.insert(&draft).await {
        Ok(record) => record,
        Err(e) => {
            let _ = state.storage.delete(&absolute_path).await;
            return Err(AppError::Metadata(e));
        }
    };

    Ok(Json(UploadResponse {
        message: "file uploaded".to_string(),
        file_id: record.id,
        original_filename: record.original_filename,
        stored_filename: record.stored_filename,
        file_size: record.file_size,
        file_path: record.file_path,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub search: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

/// `GET /api/files/`: paginated listing, optionally filtered by a
/// case-insensitive substring match against `original_filename`.
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<crate::db::FilePage>, AppError> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);

    let page_result = state.db.list(page, limit, query.search.as_deref()).await?;
    Ok(Json(page_result))
}

/// `GET /api/files/{id}`: full record.
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<FileRecord>, AppError> {
    let record = state.db.get_by_id(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(record))
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub file_id: i64,
    pub original_filename: String,
    pub file_size: i64,
    pub total_records: i64,
    pub total_columns: i64,
    pub null_records: i64,
    pub duplicate_records: BTreeMap<String, i64>,
    pub time_consumption: Option<String>,
    pub memory_usage_mb: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// `GET /api/files/reference/{ref}/report`: the analysis-report shape in §6.
/// Not analyzed yet → 404, since there is nothing to report.
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(file_reference): Path<String>,
) -> Result<Json<ReportResponse>, AppError> {
    let record = state
        .db
        .get_by_reference(&file_reference)
        .await?
        .ok_or(AppError::NotFound)?;

    if !record.is_analyzed() {
        return Err(AppError::NotFound);
    }

    Ok(Json(ReportResponse {
        file_id: record.id,
        original_filename: record.original_filename,
        file_size: record.file_size,
        total_records: record.total_rows.unwrap_or(0),
        total_columns: record.total_columns.unwrap_or(0),
        null_records: record.null_count.unwrap_or(0),
        duplicate_records: record.duplicate_records.unwrap_or_default(),
        time_consumption: record.analysis_time,
        memory_usage_mb: record.memory_usage_mb,
        created_at: record.created_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    #[serde(default = "default_preview_limit")]
    pub limit: usize,
}

fn default_preview_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub file_id: i64,
    pub columns: Vec<String>,
    pub records: Vec<BTreeMap<String, Option<String>>>,
    pub total_rows: Option<i64>,
    pub preview_count: usize,
}

/// `GET /api/files/{id}/preview`: the first `limit` data rows, read straight
/// off disk (not from any cached copy) using the same CSV reader the
/// analyzer uses.
pub async fn preview_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewResponse>, AppError> {
    let record = state.db.get_by_id(id).await?.ok_or(AppError::NotFound)?;
    let limit = query.limit.max(1);

    let path = record.file_path.clone();
    let (columns, records) =
        tokio::task::spawn_blocking(move || read_preview_rows(&path, limit))
            .await
            .map_err(|_| AppError::Validation("preview task panicked".to_string()))??;

    Ok(Json(PreviewResponse {
        file_id: record.id,
        columns,
        preview_count: records.len(),
        records,
        total_rows: record.total_rows,
    }))
}

fn read_preview_rows(
    path: &str,
    limit: usize,
) -> Result<(Vec<String>, Vec<BTreeMap<String, Option<String>>>), AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .map_err(|e| AppError::Validation(format!("failed to read CSV: {e}")))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::Validation(format!("failed to read CSV header: {e}")))?
        .iter()
        .map(String::from)
        .collect();

    let mut records = Vec::with_capacity(limit);
    for result in reader.records().take(limit) {
        let row =
            result.map_err(|e| AppError::Validation(format!("malformed CSV row: {e}")))?;
        let mut record = BTreeMap::new();
        for (column, field) in headers.iter().zip(row.iter()) {
            let value = if crate::analyzer::is_null_sentinel(field) {
                None
            } else {
                Some(field.to_string())
            };
            record.insert(column.clone(), value);
        }
        records.push(record);
    }

    Ok((headers, records))
}

/// `DELETE /api/files/{id}`: transactional row delete, then file unlink
/// (§4.5) — a crash between the two leaves a recoverable orphan file, which
/// is out of core scope to reconcile.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<(), AppError> {
    let record = state.db.delete(id).await?.ok_or(AppError::NotFound)?;
    state
        .storage
        .delete(std::path::Path::new(&record.file_path))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_extension_is_case_insensitive() {
        assert!(has_csv_extension("data.csv"));
        assert!(has_csv_extension("DATA.CSV"));
        assert!(!has_csv_extension("data.tsv"));
    }

    #[test]
    fn default_page_and_limit_are_sane() {
        assert_eq!(default_page(), 1);
        assert_eq!(default_limit(), 20);
    }
}
