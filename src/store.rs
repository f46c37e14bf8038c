//! Document persistence.
//!
//! [`DocumentStore`] is the narrow interface the pipeline and chat use;
//! [`SqliteStore`] implements it on a single SQLite file (bundled SQLite, so
//! no system library is needed).
//!
//! Records are immutable: there is an insert and a delete, no update. When
//! the last record is deleted the id sequence is reset, so the next insert
//! gets id 1 again, matching a fresh store.
//!
//! Store methods are synchronous and hit the disk. Async callers go through
//! [`run_blocking`], which moves the call onto Tokio's blocking pool.

use crate::error::{PipelineError, StoreError};
use crate::fields::ExtractedFields;
use crate::output::DocumentOcrResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// A stored document with its OCR data and extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub filename: String,
    pub upload_timestamp: DateTime<Utc>,
    pub ocr_data: DocumentOcrResult,
    pub extracted_data: ExtractedFields,
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: i64,
    pub filename: String,
    pub upload_timestamp: DateTime<Utc>,
}

/// Keyed document storage.
pub trait DocumentStore: Send + Sync {
    /// Store a new record and return its id.
    fn insert(
        &self,
        filename: &str,
        ocr_data: &DocumentOcrResult,
        extracted_data: &ExtractedFields,
    ) -> Result<i64, StoreError>;

    fn get(&self, id: i64) -> Result<Option<DocumentRecord>, StoreError>;

    /// All records, newest first.
    fn list(&self) -> Result<Vec<DocumentSummary>, StoreError>;

    /// Remove a record. Returns false when no record had that id.
    fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

/// A store shared between async tasks.
pub type SharedStore = Arc<dyn DocumentStore>;

/// Run one store call on the blocking pool.
pub async fn run_blocking<T, F>(store: &SharedStore, call: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce(&dyn DocumentStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|e| PipelineError::Internal(format!("Store task panicked: {}", e)))?
        .map_err(PipelineError::from)
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT NOT NULL,
        upload_timestamp TEXT NOT NULL,
        ocr_data TEXT NOT NULL,          -- JSON array of pages
        extracted_data TEXT NOT NULL     -- JSON object
    );
    CREATE INDEX IF NOT EXISTS idx_documents_uploaded
        ON documents(upload_timestamp);
"#;

/// SQLite-backed [`DocumentStore`]. One connection, writes serialised by a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!("Opened document store at {}", path.display());
        Self::with_connection(conn)
    }

    /// A throwaway database, for tests and one-off runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl DocumentStore for SqliteStore {
    fn insert(
        &self,
        filename: &str,
        ocr_data: &DocumentOcrResult,
        extracted_data: &ExtractedFields,
    ) -> Result<i64, StoreError> {
        let ocr_json = serde_json::to_string(ocr_data)?;
        let extracted_json = serde_json::to_string(extracted_data)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO documents (filename, upload_timestamp, ocr_data, extracted_data)
             VALUES (?1, ?2, ?3, ?4)",
            params![filename, Utc::now(), ocr_json, extracted_json],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Stored document {} as id {}", filename, id);
        Ok(id)
    }

    fn get(&self, id: i64) -> Result<Option<DocumentRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, filename, upload_timestamp, ocr_data, extracted_data
                 FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, DateTime<Utc>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, filename, upload_timestamp, ocr_json, extracted_json)) = row else {
            return Ok(None);
        };
        Ok(Some(DocumentRecord {
            id,
            filename,
            upload_timestamp,
            ocr_data: serde_json::from_str(&ocr_json)?,
            extracted_data: serde_json::from_str(&extracted_json)?,
        }))
    }

    fn list(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, filename, upload_timestamp FROM documents
             ORDER BY upload_timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DocumentSummary {
                id: row.get(0)?,
                filename: row.get(1)?,
                upload_timestamp: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        if removed > 0 {
            let remaining: i64 = tx.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
            if remaining == 0 {
                tx.execute("DELETE FROM sqlite_sequence WHERE name = 'documents'", [])?;
                debug!("Store empty; id sequence reset");
            }
        }
        tx.commit()?;
        Ok(removed > 0)
    }
}
