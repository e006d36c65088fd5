//! Pipeline Orchestrator (C6): drives one upload through phases 1-9 (§4.6),
//! publishing `UploadEvent`s to the bus as it goes. Phases 1-3 run inline in
//! the handler and can still reject with a plain HTTP 400 — `axum`'s
//! `Multipart::Field` borrows its parent extractor and cannot be moved into
//! a detached task, so the body has to be read to an owned buffer before the
//! SSE response is constructed. From phase 4 onward the SSE response has
//! already begun, so every failure becomes a terminal `error` event instead
//! (see the pre-stream boundary note in SPEC_FULL.md / DESIGN.md).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Multipart, Query, State};
use axum::response::sse::{Event, Sse};
use futures::Stream;
use serde::Deserialize;

use crate::analyzer::{self, AnalyzerEvent};
use crate::db::{AnalysisUpdate, NewFileRecord};
use crate::error::AppError;
use crate::events::{self, EventSender, UploadEvent};
use crate::memory_sampler::MemorySampler;
use crate::sse;
use crate::state::AppState;

const STORED_EXTENSION: &str = "csv";

#[derive(Debug, Deserialize)]
pub struct UploadSseQuery {
    #[serde(default = "default_update_interval")]
    pub update_interval: f64,
}

fn default_update_interval() -> f64 {
    0.5
}

fn has_csv_extension(filename: &str) -> bool {
    filename
        .rsplit('.')
        .next()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// `POST /api/files/upload-sse`
pub async fn upload_sse(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadSseQuery>,
    mut multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // advisory only; see the coalescing note in §4.6 and the open-question
    // resolution recorded in DESIGN.md.
    let _update_interval = query.update_interval.max(0.1);

    // Phases 1-3: still pre-stream, so a rejection here is a plain 400.
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

    let (tx, rx) = events::channel();
    tokio::spawn(run_pipeline(
        state,
        bytes,
        original_filename,
        content_type,
        tx,
    ));

    Ok(sse::stream(rx))
}

async fn run_pipeline(
    state: Arc<AppState>,
    bytes: axum::body::Bytes,
    original_filename: String,
    content_type: String,
    tx: EventSender,
) {
    let _ = tx
        .send(
            UploadEvent::uploading(0.00, "upload started")
                .with_original_filename(original_filename.clone()),
        )
        .await;
    let _ = tx
        .send(UploadEvent::uploading(0.10, "file extension accepted"))
        .await;
    let _ = tx
        .send(
            UploadEvent::uploading(0.20, "file content read")
                .with_file_size(bytes.len() as i64),
        )
        .await;
    let _ = tx
        .send(UploadEvent::uploading(0.30, "file size within limit"))
        .await;

    // Phase 5: filename allocation and storage write.
    let _ = tx.send(UploadEvent::uploading(0.50, "storing file")).await;
    let (stored_filename, absolute_path) =
        match state.storage.write(&bytes, STORED_EXTENSION).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = tx
                    .send(UploadEvent::error(format!("failed to store file: {e}")))
                    .await;
                return;
            }
        };

    // Phase 6: metadata insert, rolling back the stored file on failure.
    let _ = tx
        .send(UploadEvent::uploading(0.70, "recording metadata"))
        .await;
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
            let _ = tx
                .send(UploadEvent::error(format!(
                    "failed to record metadata: {e}"
                )))
                .await;
            return;
        }
    };

    let _ = tx
        .send(
            UploadEvent::uploading(0.90, "metadata recorded")
                .with_file_id(record.id)
                .with_file_reference(record.file_reference.clone())
                .with_original_filename(record.original_filename.clone())
                .with_stored_filename(record.stored_filename.clone())
                .with_file_size(record.file_size)
                .with_file_path(record.file_path.clone()),
        )
        .await;
    let _ = tx
        .send(UploadEvent::uploading(1.00, "handing off to analyzer"))
        .await;

    // Phase 7: analyze on a worker thread (§5); the sampler runs on its own
    // background task for the duration of the analysis. The "analyzer
    // started" event is published *before* the blocking task is spawned —
    // otherwise the worker thread can race ahead and publish its own
    // "csv loaded" (0.20) event before this one, breaking the non-decreasing
    // progress invariant (§8, invariant 2).
    let _ = tx
        .send(UploadEvent::analyzing(0.10, "analyzer started"))
        .await;

    let sampler = MemorySampler::start();
    let analysis_path = absolute_path.clone();
    let progress_tx = tx.clone();
    let analyzer_handle = tokio::task::spawn_blocking(move || {
        analyzer::analyze(&analysis_path, analyzer::default_chunk_size(), move |event| {
            if let Some(upload_event) = translate_analyzer_event(event) {
                // `blocking_send` is correct here: this closure runs on the
                // blocking worker thread alongside the analyzer, not on the
                // async runtime.
                let _ = progress_tx.blocking_send(upload_event);
            }
        })
    });

    let start = Instant::now();
    let outcome = match analyzer_handle.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            sampler.stop();
            let _ = tx
                .send(UploadEvent::error(format!("analysis failed: {e}")))
                .await;
            return;
        }
        Err(_join_error) => {
            sampler.stop();
            let _ = tx
                .send(UploadEvent::error("analysis task was cancelled"))
                .await;
            return;
        }
    };
    let elapsed_seconds = start.elapsed().as_secs_f64();
    let peak_mb = sampler.stop();

    let _ = tx
        .send(
            UploadEvent::analyzing(0.90, "analysis finished")
                .with_totals(outcome.total_rows as i64, outcome.total_columns as i64)
                .with_null_count(outcome.null_rows as i64),
        )
        .await;

    let duplicate_records: std::collections::BTreeMap<String, i64> = outcome
        .duplicate_counts
        .into_iter()
        .map(|(column, count)| (column, count as i64))
        .collect();

    let update = AnalysisUpdate {
        null_count: outcome.null_rows as i64,
        total_rows: outcome.total_rows as i64,
        total_columns: outcome.total_columns as i64,
        duplicate_records: duplicate_records.clone(),
        analysis_time: format!("{elapsed_seconds:.2}"),
        memory_usage_mb: Some(format!("{peak_mb:.2}")),
    };

    // Phase 8: a failed update does not fail the upload — the file is
    // durable and the analysis succeeded, so we still complete using the
    // in-memory values and just log the persistence failure (§7).
    if let Err(e) = state.db.update_analysis(record.id, &update).await {
        tracing::error!(
            file_reference = %record.file_reference,
            error = %e,
            "failed to persist analysis results; completing with in-memory values"
        );
    }

    let _ = tx
        .send(
            UploadEvent::completed("analysis complete")
                .with_file_id(record.id)
                .with_file_reference(record.file_reference.clone())
                .with_original_filename(record.original_filename.clone())
                .with_totals(update.total_rows, update.total_columns)
                .with_null_count(update.null_count)
                .with_time_consumption(elapsed_seconds)
                .with_memory_usage_mb(peak_mb)
                .with_duplicate_records(duplicate_records),
        )
        .await;
}

/// Maps a C2 analyzer event onto the wire-level `UploadEvent` shape, per the
/// progress formula in §4.2 for chunk events.
fn translate_analyzer_event(event: AnalyzerEvent) -> Option<UploadEvent> {
    match event {
        AnalyzerEvent::Loaded {
            total_rows_hint,
            total_columns,
        } => Some(
            UploadEvent::analyzing(0.20, "csv loaded")
                .with_totals(total_rows_hint as i64, total_columns as i64),
        ),
        AnalyzerEvent::Chunk {
            rows_processed,
            null_rows,
            total_rows_hint,
        } => {
            let progress = analyzer::chunk_progress_fraction(rows_processed, total_rows_hint);
            Some(
                UploadEvent::analyzing(progress, "analyzing rows")
                    .with_processed_count(rows_processed as i64)
                    .with_null_count(null_rows as i64),
            )
        }
        AnalyzerEvent::ColumnAggregated { .. } => None,
        AnalyzerEvent::Complete { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_extension_is_case_insensitive() {
        assert!(has_csv_extension("data.csv"));
        assert!(has_csv_extension("DATA.CSV"));
        assert!(!has_csv_extension("data.tsv"));
        assert!(!has_csv_extension("data"));
    }

    #[test]
    fn translate_loaded_event_carries_totals_at_fixed_progress() {
        let event = translate_analyzer_event(AnalyzerEvent::Loaded {
            total_rows_hint: 42,
            total_columns: 3,
        })
        .unwrap();
        assert_eq!(event.total_rows, Some(42));
        assert_eq!(event.total_columns, Some(3));
        assert!((event.progress - 0.20).abs() < 1e-9);
    }

    #[test]
    fn translate_chunk_event_carries_processed_and_null_counts() {
        let event = translate_analyzer_event(AnalyzerEvent::Chunk {
            rows_processed: 50,
            null_rows: 5,
            total_rows_hint: 100,
        })
        .unwrap();
        assert_eq!(event.processed_count, Some(50));
        assert_eq!(event.null_count, Some(5));
        assert!((event.progress - 0.5).abs() < 1e-9);
    }

    #[test]
    fn translate_complete_event_is_swallowed() {
        assert!(translate_analyzer_event(AnalyzerEvent::Complete {
            total_rows: 10,
            total_columns: 2
        })
        .is_none());
    }
}
