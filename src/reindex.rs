use crate::document::IndexMapping;
use crate::error::ReindexError;
use crate::indexer::IndexingGateway;
use crate::metadata::ImageRecord;
use crate::store::RecordStore;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ReindexReport {
    pub indexed: usize,
}

/// Rebuilds the search index from the record store.
///
/// Drops the index, recreates it with the explicit mapping and upserts every
/// record in store order. Searches running meanwhile may see an empty or
/// partial index, and concurrent uploads interleave last-writer-wins.
pub struct ReindexCoordinator {
    store: Arc<dyn RecordStore>,
    gateway: IndexingGateway,
    mapping: IndexMapping,
}

impl ReindexCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, gateway: IndexingGateway) -> Self {
        Self {
            store,
            gateway,
            mapping: IndexMapping::images(),
        }
    }

    /// Load every record and rebuild from them.
    pub async fn run(&self) -> Result<ReindexReport, ReindexError> {
        let records = self.store.list_all().await?;
        log::info!("Loaded {} records for reindex.", records.len());
        self.rebuild(&records).await
    }

    pub async fn rebuild(&self, records: &[ImageRecord]) -> Result<ReindexReport, ReindexError> {
        let index = self.gateway.index();
        log::info!("Rebuilding index '{}' from {} records.", index.index_name(), records.len());

        index.delete_index().await.map_err(ReindexError::DropIndex)?;
        index
            .create_index(&self.mapping)
            .await
            .map_err(ReindexError::CreateIndex)?;

        for (indexed, record) in records.iter().enumerate() {
            if let Err(source) = self.gateway.upsert(record).await {
                log::error!(
                    "Reindex aborted at record {} after {} records: {}",
                    record.id,
                    indexed,
                    source
                );
                return Err(ReindexError::Document {
                    id: record.id,
                    indexed,
                    source,
                });
            }
            log::trace!("Reindexed record {}", record.id);
        }

        index.refresh().await.map_err(ReindexError::Refresh)?;
        log::info!("Reindex of '{}' finished: {} documents.", index.index_name(), records.len());
        Ok(ReindexReport {
            indexed: records.len(),
        })
    }
}
