use crate::error::StoreError;
use crate::metadata::{ImageRecord, NewImage};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// The system of record for image metadata.
///
/// Implementations assign `id` and `created_at` and guarantee id uniqueness.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, image: NewImage) -> Result<ImageRecord, StoreError>;
    async fn get(&self, id: i64) -> Result<Option<ImageRecord>, StoreError>;
    /// Newest first, by `created_at` then `id`.
    async fn list_recent(&self, limit: usize) -> Result<Vec<ImageRecord>, StoreError>;
    /// Every record in id order. Only the reindex path needs this.
    async fn list_all(&self) -> Result<Vec<ImageRecord>, StoreError>;
}

const SELECT_COLUMNS: &str = "SELECT id, original_filename, stored_filename, description, tags, \
     storage_locator, created_at, view_count FROM images";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                log::debug!("Created database directory: {:?}", parent);
            }
        }
        let conn = Connection::open(path)?;
        log::info!("Record store opened at {:?}", path);
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await?
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS images (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            original_filename   TEXT NOT NULL,
            stored_filename     TEXT NOT NULL UNIQUE,
            description         TEXT,
            tags                TEXT NOT NULL DEFAULT '[]',
            storage_locator     TEXT NOT NULL,
            created_at          INTEGER NOT NULL,
            view_count          INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_images_created_at
         ON images(created_at DESC, id DESC)",
        [],
    )?;
    log::debug!("Record store schema initialized.");
    Ok(())
}

/// Column values as stored, before tags and timestamps are decoded.
struct RawRow {
    id: i64,
    original_filename: String,
    stored_filename: String,
    description: Option<String>,
    tags: String,
    storage_locator: String,
    created_at_micros: i64,
    view_count: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            original_filename: row.get(1)?,
            stored_filename: row.get(2)?,
            description: row.get(3)?,
            tags: row.get(4)?,
            storage_locator: row.get(5)?,
            created_at_micros: row.get(6)?,
            view_count: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<ImageRecord, StoreError> {
        let tags: Vec<String> =
            serde_json::from_str(&self.tags).map_err(|e| StoreError::Corrupt {
                id: self.id,
                reason: format!("tags column: {}", e),
            })?;
        let created_at: DateTime<Utc> = Utc
            .timestamp_micros(self.created_at_micros)
            .single()
            .ok_or_else(|| StoreError::Corrupt {
                id: self.id,
                reason: format!("created_at out of range: {}", self.created_at_micros),
            })?;
        Ok(ImageRecord {
            id: self.id,
            original_filename: self.original_filename,
            stored_filename: self.stored_filename,
            description: self.description,
            tags,
            storage_locator: self.storage_locator,
            created_at,
            view_count: self.view_count,
        })
    }
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ImageRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, RawRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(RawRow::into_record).collect()
}

fn fetch_one(conn: &Connection, id: i64) -> Result<Option<ImageRecord>, StoreError> {
    let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
    conn.query_row(&sql, params![id], RawRow::from_row)
        .optional()?
        .map(RawRow::into_record)
        .transpose()
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create(&self, image: NewImage) -> Result<ImageRecord, StoreError> {
        self.run(move |conn| {
            let tags = serde_json::to_string(&image.tags)?;
            let created_at = Utc::now().timestamp_micros();
            conn.execute(
                "INSERT INTO images
                    (original_filename, stored_filename, description, tags, storage_locator, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    image.original_filename,
                    image.stored_filename,
                    image.description,
                    tags,
                    image.storage_locator,
                    created_at
                ],
            )?;
            let id = conn.last_insert_rowid();
            log::debug!("Inserted image record {} ({})", id, image.stored_filename);
            fetch_one(conn, id)?.ok_or(StoreError::Corrupt {
                id,
                reason: "row vanished after insert".into(),
            })
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Option<ImageRecord>, StoreError> {
        self.run(move |conn| fetch_one(conn, id)).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ImageRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let sql = format!("{} ORDER BY created_at DESC, id DESC LIMIT ?1", SELECT_COLUMNS);
            query_records(conn, &sql, params![limit])
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        self.run(|conn| {
            let sql = format!("{} ORDER BY id ASC", SELECT_COLUMNS);
            query_records(conn, &sql, [])
        })
        .await
    }
}
