//! Chunked CSV analyzer (C2): scans a CSV file in fixed-size row chunks,
//! classifying null/sentinel rows and counting per-column duplicates while
//! reporting progress back to the caller via callback.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

/// The closed set of string tokens treated as missing data, after trimming
/// surrounding whitespace and lowercasing (§4.2). No configuration knob
/// exists for this set by design.
const NULL_SENTINELS: &[&str] = &["", "null", "none", "undefined", "nan", "n/a", "na"];

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("malformed CSV at row {row}: {source}")]
    ParseError { row: u64, source: csv::Error },
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Final result of a full analysis pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub null_rows: u64,
    pub duplicate_counts: BTreeMap<String, u64>,
    pub total_rows: u64,
    pub total_columns: u64,
}

/// Progress notifications emitted during `analyze`. The analyzer never
/// blocks on these — the caller's callback is expected to push an event onto
/// a bus and return immediately (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerEvent {
    /// Emitted exactly once, right after the header row is read, before any
    /// data row is processed (phase 7b, §4.6).
    Loaded {
        total_rows_hint: u64,
        total_columns: u64,
    },
    /// One per processed chunk (and a final partial chunk, if any).
    /// `total_rows_hint` is the cheap upfront estimate used only to compute
    /// a progress fraction — never relied on for the final row count.
    Chunk {
        rows_processed: u64,
        null_rows: u64,
        total_rows_hint: u64,
    },
    /// One per column, emitted during the final duplicate-aggregation pass.
    ColumnAggregated { column_index: usize },
    /// Emitted exactly once, after the last chunk, with exact totals.
    Complete { total_rows: u64, total_columns: u64 },
}

const DEFAULT_CHUNK_SIZE: usize = 100_000;

pub fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Run the analysis. Intended to be called from a blocking worker thread
/// (e.g. `tokio::task::spawn_blocking`) since it is CPU/IO bound and must not
/// starve the cooperative scheduler (§5).
pub fn analyze(
    path: &Path,
    chunk_size: usize,
    mut progress_cb: impl FnMut(AnalyzerEvent),
) -> Result<AnalysisOutcome, AnalyzeError> {
    let chunk_size = chunk_size.max(1);
    let total_rows_hint = estimate_total_rows(path)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let total_columns = headers.len();
    let column_names: Vec<String> = headers.iter().map(String::from).collect();

    progress_cb(AnalyzerEvent::Loaded {
        total_rows_hint,
        total_columns: total_columns as u64,
    });

    let mut value_counts: Vec<HashMap<String, u64>> = vec![HashMap::new(); total_columns];
    let mut rows_processed: u64 = 0;
    let mut null_rows: u64 = 0;
    let mut rows_in_current_chunk: u64 = 0;

    for result in reader.records() {
        let record = result.map_err(|source| {
            let row = source.position().map(|p| p.line()).unwrap_or(rows_processed + 1);
            AnalyzeError::ParseError { row, source }
        })?;

        let mut row_is_null = false;
        for (column_index, field) in record.iter().enumerate() {
            if is_null_sentinel(field) {
                row_is_null = true;
            }
            if let Some(counts) = value_counts.get_mut(column_index) {
                *counts.entry(field.to_string()).or_insert(0) += 1;
            }
        }

        rows_processed += 1;
        rows_in_current_chunk += 1;
        if row_is_null {
            null_rows += 1;
        }

        if rows_in_current_chunk as usize >= chunk_size {
            progress_cb(AnalyzerEvent::Chunk {
                rows_processed,
                null_rows,
                total_rows_hint,
            });
            rows_in_current_chunk = 0;
        }
    }

    // Flush a final partial chunk, if the file didn't land on a chunk boundary.
    if rows_in_current_chunk > 0 || rows_processed == 0 {
        progress_cb(AnalyzerEvent::Chunk {
            rows_processed,
            null_rows,
            total_rows_hint,
        });
    }

    let mut duplicate_counts = BTreeMap::new();
    for (column_index, name) in column_names.iter().enumerate() {
        let extra = value_counts[column_index]
            .values()
            .filter(|&&count| count >= 2)
            .map(|&count| count - 1)
            .sum::<u64>();
        if extra > 0 {
            duplicate_counts.insert(name.clone(), extra);
        }
        progress_cb(AnalyzerEvent::ColumnAggregated { column_index });
    }

    let total_rows = rows_processed;
    progress_cb(AnalyzerEvent::Complete {
        total_rows,
        total_columns: total_columns as u64,
    });

    Ok(AnalysisOutcome {
        null_rows,
        duplicate_counts,
        total_rows,
        total_columns: total_columns as u64,
    })
}

/// `progress` value to publish for a `Chunk` event, per the §4.2 formula:
/// `0.1 + 0.8 * rows_processed / max(total_rows, 1)`, clamped to `[0.1, 0.9]`.
pub fn chunk_progress_fraction(rows_processed: u64, total_rows_hint: u64) -> f64 {
    let denom = total_rows_hint.max(1) as f64;
    let raw = 0.1 + 0.8 * (rows_processed as f64 / denom);
    raw.clamp(0.1, 0.9)
}

/// A row is null if any cell, after trimming and lowercasing, matches a
/// closed sentinel set. The CSV crate surfaces an empty field as `""`, the
/// same token it would use for pandas-native NaN, so no separate native-null
/// check is needed here (§4.2).
pub(crate) fn is_null_sentinel(field: &str) -> bool {
    let normalized = field.trim().to_lowercase();
    NULL_SENTINELS.contains(&normalized.as_str())
}

/// Cheap upfront line count used only to seed the progress-percentage
/// denominator; never relied on for correctness of `total_rows` in the
/// final `AnalysisOutcome`, which is always the exact chunked row count.
fn estimate_total_rows(path: &Path) -> Result<u64, std::io::Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut lines: u64 = 0;
    let mut buf = Vec::new();
    while reader.read_until(b'\n', &mut buf)? > 0 {
        lines += 1;
        buf.clear();
    }
    Ok(lines.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn analyze_all(contents: &str, chunk_size: usize) -> AnalysisOutcome {
        let file = write_csv(contents);
        analyze(file.path(), chunk_size, |_| {}).unwrap()
    }

    #[test]
    fn loaded_event_is_emitted_first_with_column_count() {
        let file = write_csv("a,b,c\n1,2,3\n4,5,6\n");
        let mut events = Vec::new();
        analyze(file.path(), 100_000, |event| events.push(event)).unwrap();

        match &events[0] {
            AnalyzerEvent::Loaded {
                total_columns,
                total_rows_hint,
            } => {
                assert_eq!(*total_columns, 3);
                assert_eq!(*total_rows_hint, 2);
            }
            other => panic!("expected Loaded first, got {other:?}"),
        }
    }

    #[test]
    fn s1_mixed_nulls_no_duplicates() {
        let outcome = analyze_all("a,b\n1,2\n3,\n,5\n", 100_000);
        assert_eq!(outcome.total_rows, 3);
        assert_eq!(outcome.total_columns, 2);
        assert_eq!(outcome.null_rows, 2);
        assert!(outcome.duplicate_counts.is_empty());
    }

    #[test]
    fn s2_case_sensitive_duplicates() {
        let outcome = analyze_all("x\nfoo\nFOO\nfoo\n", 100_000);
        assert_eq!(outcome.total_rows, 3);
        assert_eq!(outcome.total_columns, 1);
        assert_eq!(outcome.null_rows, 0);
        assert_eq!(outcome.duplicate_counts.get("x"), Some(&1));
    }

    #[test]
    fn s3_all_seven_sentinels() {
        let outcome = analyze_all("c\n \n null\nNone\nundefined\nNaN\nN/A\nvalue\n", 100_000);
        assert_eq!(outcome.null_rows, 6);
        assert_eq!(outcome.total_rows, 7);
        assert!(outcome.duplicate_counts.is_empty());
    }

    #[test]
    fn zero_data_rows_returns_zeros() {
        let outcome = analyze_all("a,b,c\n", 100_000);
        assert_eq!(outcome.total_rows, 0);
        assert_eq!(outcome.total_columns, 3);
        assert_eq!(outcome.null_rows, 0);
        assert!(outcome.duplicate_counts.is_empty());
    }

    #[test]
    fn total_rows_and_columns_independent_of_chunk_size() {
        let contents = "a,b\n1,x\n2,y\n3,z\n4,w\n5,v\n";
        for chunk_size in [1, 2, 3, 7, 100] {
            let outcome = analyze_all(contents, chunk_size);
            assert_eq!(outcome.total_rows, 5, "chunk_size={chunk_size}");
            assert_eq!(outcome.total_columns, 2, "chunk_size={chunk_size}");
        }
    }

    #[test]
    fn entirely_empty_row_counts_as_one_null_row() {
        let outcome = analyze_all("a,b\n,\n", 100_000);
        assert_eq!(outcome.null_rows, 1);
        assert_eq!(outcome.total_rows, 1);
    }

    #[test]
    fn malformed_row_reports_parse_error() {
        let file = write_csv("a,b\n1,2\n3\n");
        let err = analyze(file.path(), 100_000, |_| {}).unwrap_err();
        match err {
            AnalyzeError::ParseError { row, .. } => assert_eq!(row, 3),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn chunk_progress_fraction_is_clamped() {
        assert_eq!(chunk_progress_fraction(0, 100), 0.1);
        assert!((chunk_progress_fraction(50, 100) - 0.5).abs() < 1e-9);
        assert_eq!(chunk_progress_fraction(1000, 100), 0.9);
    }

    #[test]
    fn duplicate_keys_are_not_trimmed() {
        // " foo" and "foo" must be counted as distinct values (§4.2).
        let outcome = analyze_all("x\nfoo\n foo\nfoo\n", 100_000);
        assert_eq!(outcome.duplicate_counts.get("x"), Some(&1));
    }
}
