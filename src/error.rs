use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use elasticsearch::http::transport::BuildError;
use elasticsearch::Error as ElasticsearchError;
use serde_json::Error as SerdeJsonError;
use std::time::Duration;
use tantivy::TantivyError;
use thiserror::Error;
use tokio::task::JoinError;

/// Failures talking to the record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    #[error("Store task failed: {0}")]
    Join(#[from] JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single call against the search index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Elasticsearch error: {0}")]
    Elasticsearch(#[from] ElasticsearchError),

    #[error("Elasticsearch transport error: {0}")]
    Transport(#[from] BuildError),

    #[error("Invalid search URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("Index '{index}' rejected request with status {status}: {body}")]
    Rejected {
        index: String,
        status: u16,
        body: String,
    },

    #[error("Index '{0}' does not exist")]
    Missing(String),

    #[error("Index call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed index response: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    #[error("Index task failed: {0}")]
    Join(#[from] JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a full rebuild. Any of these leaves the index incomplete.
#[derive(Error, Debug)]
pub enum ReindexError {
    #[error("Could not load records for reindex: {0}")]
    Store(#[from] StoreError),

    #[error("Could not drop index: {0}")]
    DropIndex(#[source] IndexError),

    #[error("Could not create index: {0}")]
    CreateIndex(#[source] IndexError),

    #[error("Indexing record {id} failed after {indexed} records: {source}")]
    Document {
        id: i64,
        indexed: usize,
        #[source]
        source: IndexError,
    },

    #[error("Could not refresh index: {0}")]
    Refresh(#[source] IndexError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search index error: {0}")]
    Index(#[from] IndexError),

    #[error("Reindex failed: {0}")]
    Reindex(#[from] ReindexError),

    #[error("Upload failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({
                "error": self.to_string(),
            }))
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Index(IndexError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Index(_) => StatusCode::BAD_GATEWAY,
            AppError::Reindex(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}
