//! Upload event bus (C3): a bounded channel carrying progress notifications
//! from the pipeline orchestrator (C6) to the SSE serializer (C7). Backpressure
//! on the bounded channel is how a slow client (or a disconnected one, once the
//! receiver is dropped) throttles the producer rather than the producer
//! buffering unboundedly in memory (§4.3).

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::mpsc;

/// Channel capacity. Deliberately small: a hung consumer should make the
/// producer feel backpressure within a handful of events, not thousands.
pub const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploading,
    Analyzing,
    Completed,
    Error,
}

/// A single notification pushed onto the bus and ultimately rendered as one
/// SSE frame (§3, §4.7). `status`/`progress`/`message` are always present;
/// everything else is the optional metadata bundle, populated only once the
/// corresponding phase has produced it, and otherwise omitted from the JSON
/// frame entirely.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UploadEvent {
    pub status: Option<UploadStatus>,
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_columns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_consumption: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_records: Option<BTreeMap<String, i64>>,
}

impl UploadEvent {
    fn base(status: UploadStatus, progress: f64, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            progress,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn uploading(progress: f64, message: impl Into<String>) -> Self {
        Self::base(UploadStatus::Uploading, progress, message)
    }

    pub fn analyzing(progress: f64, message: impl Into<String>) -> Self {
        Self::base(UploadStatus::Analyzing, progress, message)
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self::base(UploadStatus::Completed, 1.0, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::base(UploadStatus::Error, 1.0, message)
    }

    pub fn with_file_id(mut self, file_id: i64) -> Self {
        self.file_id = Some(file_id);
        self
    }

    pub fn with_file_reference(mut self, file_reference: impl Into<String>) -> Self {
        self.file_reference = Some(file_reference.into());
        self
    }

    pub fn with_original_filename(mut self, name: impl Into<String>) -> Self {
        self.original_filename = Some(name.into());
        self
    }

    pub fn with_stored_filename(mut self, name: impl Into<String>) -> Self {
        self.stored_filename = Some(name.into());
        self
    }

    pub fn with_file_size(mut self, size: i64) -> Self {
        self.file_size = Some(size);
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_null_count(mut self, count: i64) -> Self {
        self.null_count = Some(count);
        self
    }

    pub fn with_processed_count(mut self, count: i64) -> Self {
        self.processed_count = Some(count);
        self
    }

    pub fn with_totals(mut self, total_rows: i64, total_columns: i64) -> Self {
        self.total_rows = Some(total_rows);
        self.total_columns = Some(total_columns);
        self
    }

    pub fn with_time_consumption(mut self, seconds: f64) -> Self {
        self.time_consumption = Some(seconds);
        self
    }

    pub fn with_memory_usage_mb(mut self, mb: f64) -> Self {
        self.memory_usage_mb = Some(mb);
        self
    }

    pub fn with_duplicate_records(mut self, records: BTreeMap<String, i64>) -> Self {
        self.duplicate_records = Some(records);
        self
    }
}

pub type EventSender = mpsc::Sender<UploadEvent>;
pub type EventReceiver = mpsc::Receiver<UploadEvent>;

/// Construct a bounded event bus. The sender half is moved into the pipeline
/// task; dropping it (on completion, panic, or early return) is the signal
/// the SSE stream uses to close (§4.3, §4.7).
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel(CHANNEL_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_drop_closes_receiver() {
        let (tx, mut rx) = channel();
        tx.send(UploadEvent::uploading(0.0, "starting")).await.unwrap();
        drop(tx);

        let first = rx.recv().await;
        assert!(matches!(first, Some(event) if event.status == Some(UploadStatus::Uploading)));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn completed_event_serializes_with_snake_case_status() {
        let event = UploadEvent::completed("analysis complete")
            .with_file_reference("abc")
            .with_original_filename("data.csv")
            .with_totals(10, 3)
            .with_null_count(1)
            .with_time_consumption(0.5)
            .with_memory_usage_mb(12.3)
            .with_duplicate_records(BTreeMap::new());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"completed\""));
        assert!(json.contains("\"file_reference\":\"abc\""));
        assert!(json.contains("\"progress\":1.0"));
    }

    #[test]
    fn bare_uploading_event_omits_unset_optional_fields() {
        let event = UploadEvent::uploading(0.0, "upload started");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("file_reference"));
        assert!(!json.contains("total_rows"));
    }

    #[test]
    fn error_event_has_error_status_and_terminal_progress() {
        // Every terminal frame, completed or error, carries progress 1.00
        // (§8 invariant 1): the stream always finishes at 100%, it just
        // finishes either successfully or not.
        let event = UploadEvent::error("boom");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"progress\":1.0"));
    }
}
