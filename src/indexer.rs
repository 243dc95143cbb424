use crate::document::SearchDocument;
use crate::error::IndexError;
use crate::metadata::ImageRecord;
use crate::search::SearchIndex;
use std::sync::Arc;
use std::time::Duration;

/// Projects records into the search index, one bounded call at a time.
///
/// Callers decide what a failure means: the upload path logs and moves on,
/// a rebuild aborts.
#[derive(Clone)]
pub struct IndexingGateway {
    index: Arc<dyn SearchIndex>,
    timeout: Duration,
}

impl IndexingGateway {
    pub fn new(index: Arc<dyn SearchIndex>, timeout: Duration) -> Self {
        Self { index, timeout }
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    pub async fn upsert(&self, record: &ImageRecord) -> Result<(), IndexError> {
        let document = SearchDocument::from(record);
        log::debug!("Upserting search document for record {}", record.id);
        self.bounded(self.index.index_document(&document)).await
    }

    /// Removing a document that is not there is fine.
    pub async fn delete(&self, id: i64) -> Result<(), IndexError> {
        log::debug!("Removing search document {}", id);
        self.bounded(self.index.delete_document(id)).await
    }

    async fn bounded<F>(&self, call: F) -> Result<(), IndexError>
    where
        F: std::future::Future<Output = Result<(), IndexError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(IndexError::Timeout(self.timeout)),
        }
    }
}
