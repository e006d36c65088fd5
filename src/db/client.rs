use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::db::models::*;

/// Transactional store of `FileRecord` rows, keyed by dense numeric id and by
/// opaque `file_reference` string (§4.5).
///
/// Each public method here is its own transaction; sqlx commits a bare
/// `execute`/`fetch_*` call against the pool as soon as it completes, so there
/// is no explicit `BEGIN`/`COMMIT` needed for single-statement operations.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect (creating the database file if needed) and ensure the schema exists.
    ///
    /// An unqualified `sqlite::memory:` URL gets a fresh, empty database per
    /// connection, so a pool with more than one connection against it would
    /// silently scatter rows across unrelated in-memory databases; pin the
    /// pool to a single connection in that case.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("Connecting to {}", database_url);
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect(database_url)
                .await?
        } else {
            SqlitePool::connect(database_url).await?
        };

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_filename TEXT NOT NULL,
                stored_filename TEXT NOT NULL UNIQUE,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                file_reference TEXT NOT NULL UNIQUE,
                null_count INTEGER,
                total_rows INTEGER,
                total_columns INTEGER,
                duplicate_records TEXT,
                analysis_time TEXT,
                memory_usage_mb TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_files_original_filename ON files (original_filename)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a newly-stored file and assign it an id, a `file_reference`, and
    /// timestamps. Analysis fields start out null (phase 6).
    pub async fn insert(&self, draft: &NewFileRecord) -> Result<FileRecord, sqlx::Error> {
        let file_reference = Uuid::new_v4().simple().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO files (
                original_filename, stored_filename, file_path, file_size,
                content_type, file_reference, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&draft.original_filename)
        .bind(&draft.stored_filename)
        .bind(&draft.file_path)
        .bind(draft.file_size)
        .bind(&draft.content_type)
        .bind(&file_reference)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(FileRecord {
            id: result.last_insert_rowid(),
            original_filename: draft.original_filename.clone(),
            stored_filename: draft.stored_filename.clone(),
            file_path: draft.file_path.clone(),
            file_size: draft.file_size,
            content_type: draft.content_type.clone(),
            file_reference,
            null_count: None,
            total_rows: None,
            total_columns: None,
            duplicate_records: None,
            analysis_time: None,
            memory_usage_mb: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Write back the finished analysis (phase 8). On failure the caller
    /// logs and still completes the pipeline with its in-memory values —
    /// see §7's `MetadataError` handling.
    pub async fn update_analysis(
        &self,
        id: i64,
        update: &AnalysisUpdate,
    ) -> Result<(), sqlx::Error> {
        let duplicate_json = serde_json::to_string(&update.duplicate_records)
            .expect("BTreeMap<String, i64> always serializes");
        let updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE files
            SET null_count = ?, total_rows = ?, total_columns = ?,
                duplicate_records = ?, analysis_time = ?, memory_usage_mb = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.null_count)
        .bind(update.total_rows)
        .bind(update.total_columns)
        .bind(duplicate_json)
        .bind(&update.analysis_time)
        .bind(&update.memory_usage_mb)
        .bind(updated_at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<FileRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    pub async fn get_by_reference(
        &self,
        file_reference: &str,
    ) -> Result<Option<FileRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM files WHERE file_reference = ?")
            .bind(file_reference)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    /// `page` is 1-based. `search`, if present, is matched case-insensitively
    /// against `original_filename` as a substring.
    pub async fn list(
        &self,
        page: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<FilePage, sqlx::Error> {
        let offset = (page - 1).max(0) * limit;
        let pattern = search.map(|s| format!("%{}%", s.to_lowercase()));

        let (rows, total) = match &pattern {
            Some(pattern) => {
                let rows = sqlx::query(
                    r#"
                    SELECT * FROM files
                    WHERE LOWER(original_filename) LIKE ?
                    ORDER BY id DESC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(pattern)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                let total: i64 = sqlx::query(
                    "SELECT COUNT(*) AS count FROM files WHERE LOWER(original_filename) LIKE ?",
                )
                .bind(pattern)
                .fetch_one(&self.pool)
                .await?
                .get("count");

                (rows, total)
            }
            None => {
                let rows = sqlx::query("SELECT * FROM files ORDER BY id DESC LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;

                let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM files")
                    .fetch_one(&self.pool)
                    .await?
                    .get("count");

                (rows, total)
            }
        };

        let items = rows
            .into_iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FilePage {
            items,
            page,
            limit,
            total,
        })
    }

    /// Delete the row. The caller is responsible for unlinking the backing
    /// file via the storage adapter afterwards (§4.5: row delete precedes
    /// file unlink, so a crash between the two leaves an orphan file).
    pub async fn delete(&self, id: i64) -> Result<Option<FileRecord>, sqlx::Error> {
        let existing = self.get_by_id(id).await?;
        if existing.is_some() {
            sqlx::query("DELETE FROM files WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(existing)
    }

    fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<FileRecord, sqlx::Error> {
        let duplicate_records: Option<String> = row.get("duplicate_records");
        let duplicate_records = duplicate_records
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "duplicate_records".into(),
                source: Box::new(e),
            })?;

        Ok(FileRecord {
            id: row.get("id"),
            original_filename: row.get("original_filename"),
            stored_filename: row.get("stored_filename"),
            file_path: row.get("file_path"),
            file_size: row.get("file_size"),
            content_type: row.get("content_type"),
            file_reference: row.get("file_reference"),
            null_count: row.get("null_count"),
            total_rows: row.get("total_rows"),
            total_columns: row.get("total_columns"),
            duplicate_records,
            analysis_time: row.get("analysis_time"),
            memory_usage_mb: row.get("memory_usage_mb"),
            created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                .unwrap()
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))
                .unwrap()
                .with_timezone(&Utc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn draft(name: &str) -> NewFileRecord {
        NewFileRecord {
            original_filename: name.to_string(),
            stored_filename: format!("{}.csv", Uuid::new_v4().simple()),
            file_path: format!("/tmp/{}.csv", name),
            file_size: 123,
            content_type: "text/csv".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_unique_id_and_reference() {
        let db = test_db().await;
        let a = db.insert(&draft("a.csv")).await.unwrap();
        let b = db.insert(&draft("b.csv")).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.file_reference, b.file_reference);
        assert!(!a.is_analyzed());
    }

    #[tokio::test]
    async fn update_analysis_round_trips_duplicate_map() {
        let db = test_db().await;
        let record = db.insert(&draft("a.csv")).await.unwrap();

        let mut duplicates = std::collections::BTreeMap::new();
        duplicates.insert("col_a".to_string(), 2);

        db.update_analysis(
            record.id,
            &AnalysisUpdate {
                null_count: 1,
                total_rows: 10,
                total_columns: 3,
                duplicate_records: duplicates.clone(),
                analysis_time: "0.42".to_string(),
                memory_usage_mb: Some("12.34".to_string()),
            },
        )
        .await
        .unwrap();

        let fetched = db.get_by_id(record.id).await.unwrap().unwrap();
        assert!(fetched.is_analyzed());
        assert_eq!(fetched.null_count, Some(1));
        assert_eq!(fetched.duplicate_records, Some(duplicates));
        assert!(fetched.updated_at >= fetched.created_at);
    }

    #[tokio::test]
    async fn get_by_reference_matches_insert() {
        let db = test_db().await;
        let record = db.insert(&draft("a.csv")).await.unwrap();

        let fetched = db
            .get_by_reference(&record.file_reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, record.id);
    }

    #[tokio::test]
    async fn list_filters_by_case_insensitive_substring() {
        let db = test_db().await;
        db.insert(&draft("Sales_Report.csv")).await.unwrap();
        db.insert(&draft("inventory.csv")).await.unwrap();

        let page = db.list(1, 10, Some("sales")).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].original_filename, "Sales_Report.csv");
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let db = test_db().await;
        let record = db.insert(&draft("a.csv")).await.unwrap();

        let deleted = db.delete(record.id).await.unwrap();
        assert!(deleted.is_some());
        assert!(db.get_by_id(record.id).await.unwrap().is_none());
    }
}
