use crate::document::{IndexMapping, SearchDocument, SearchQuery};
use crate::error::IndexError;
use async_trait::async_trait;
use serde_json::Value;

/// One ranked result as returned by the index, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: Option<f64>,
    pub source: Value,
}

/// Transport to a single named search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn index_name(&self) -> &str;
    async fn index_exists(&self) -> Result<bool, IndexError>;
    async fn create_index(&self, mapping: &IndexMapping) -> Result<(), IndexError>;
    /// Succeeds when the index is already absent.
    async fn delete_index(&self) -> Result<(), IndexError>;
    /// Insert or overwrite the document keyed by its id.
    async fn index_document(&self, document: &SearchDocument) -> Result<(), IndexError>;
    /// Succeeds when the document is already absent.
    async fn delete_document(&self, id: i64) -> Result<(), IndexError>;
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, IndexError>;
    async fn suggest_tags(&self, prefix: &str, size: usize) -> Result<Vec<String>, IndexError>;
    /// Make all writes so far visible to search.
    async fn refresh(&self) -> Result<(), IndexError>;
    async fn count(&self) -> Result<u64, IndexError>;
}

/// Create the index with `mapping` unless it already exists.
/// Returns whether it had to be created.
pub async fn ensure_index_exists(
    index: &dyn SearchIndex,
    mapping: &IndexMapping,
) -> Result<bool, IndexError> {
    log::debug!("Checking if index '{}' exists.", index.index_name());
    if index.index_exists().await? {
        log::debug!("Index '{}' already exists.", index.index_name());
        return Ok(false);
    }
    log::info!("Index '{}' does not exist. Creating it.", index.index_name());
    index.create_index(mapping).await?;
    log::info!("Index '{}' created successfully.", index.index_name());
    Ok(true)
}
