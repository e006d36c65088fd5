use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stored CSV upload and, once analysis has run, its data-quality results.
///
/// `id` is the dense monotonic row id used internally (path parameters);
/// `file_reference` is the opaque token handed to clients for report lookups
/// and is never reassigned after insert.
///
/// The four analysis fields (`null_count`, `total_rows`, `total_columns`,
/// `analysis_time`) are either all `None` (not yet analyzed) or all `Some`
/// (analysis finished) — see `FileRecord::is_analyzed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: String,
    pub file_reference: String,
    pub null_count: Option<i64>,
    pub total_rows: Option<i64>,
    pub total_columns: Option<i64>,
    pub duplicate_records: Option<BTreeMap<String, i64>>,
    pub analysis_time: Option<String>,
    pub memory_usage_mb: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_analyzed(&self) -> bool {
        self.null_count.is_some() && self.total_rows.is_some() && self.total_columns.is_some()
    }
}

/// Row shape for the initial insert (phase 6 of the pipeline), before analysis
/// has produced any of the nullable fields.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: String,
}

/// Finalized analysis results applied to a `FileRecord` in a single
/// transactional update (phase 8).
#[derive(Debug, Clone)]
pub struct AnalysisUpdate {
    pub null_count: i64,
    pub total_rows: i64,
    pub total_columns: i64,
    pub duplicate_records: BTreeMap<String, i64>,
    pub analysis_time: String,
    pub memory_usage_mb: Option<String>,
}

/// One page of a file listing, optionally filtered by filename substring.
#[derive(Debug, Clone, Serialize)]
pub struct FilePage {
    pub items: Vec<FileRecord>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}
