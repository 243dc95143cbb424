use crate::decode::{decode_hit, IndexedImage};
use crate::document::SearchQuery;
use crate::error::AppError;
use crate::metadata::{non_blank, parse_tags, ImageRecord, ImageView};
use crate::search::SearchIndex;
use crate::storage::StorageResolver;
use crate::store::RecordStore;
use std::sync::Arc;

pub const SUGGESTION_SIZE: usize = 10;

/// Sends each search to the store or the index and shapes the results alike.
pub struct QueryRouter {
    store: Arc<dyn RecordStore>,
    index: Arc<dyn SearchIndex>,
    resolver: Arc<dyn StorageResolver>,
    recent_limit: usize,
    search_size: usize,
}

impl QueryRouter {
    pub fn new(
        store: Arc<dyn RecordStore>,
        index: Arc<dyn SearchIndex>,
        resolver: Arc<dyn StorageResolver>,
        recent_limit: usize,
        search_size: usize,
    ) -> Self {
        Self {
            store,
            index,
            resolver,
            recent_limit,
            search_size,
        }
    }

    /// Without text or tags this lists the newest records from the store.
    /// Otherwise the index answers, most relevant first.
    pub async fn search(
        &self,
        query: Option<&str>,
        tag_filter: Option<&str>,
    ) -> Result<Vec<ImageView>, AppError> {
        let tags = non_blank(tag_filter).map(parse_tags).unwrap_or_default();
        let search = match SearchQuery::new(query, tags, self.search_size) {
            Some(search) => search,
            None => return self.recent().await,
        };

        let hits = self.index.search(&search).await?;
        let images: Vec<ImageView> = hits
            .iter()
            .filter_map(decode_hit)
            .map(|image| self.indexed_view(image))
            .collect();
        log::debug!("Search {:?} returned {} images", search, images.len());
        Ok(images)
    }

    pub async fn recent(&self) -> Result<Vec<ImageView>, AppError> {
        let records = self.store.list_recent(self.recent_limit).await?;
        log::debug!("Listing {} recent images from the store", records.len());
        Ok(records.into_iter().map(|r| self.record_view(r)).collect())
    }

    pub async fn get(&self, id: i64) -> Result<ImageView, AppError> {
        match self.store.get(id).await? {
            Some(record) => Ok(self.record_view(record)),
            None => Err(AppError::NotFound(format!("image {}", id))),
        }
    }

    pub async fn suggest_tags(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        Ok(self.index.suggest_tags(prefix, SUGGESTION_SIZE).await?)
    }

    pub fn record_view(&self, record: ImageRecord) -> ImageView {
        ImageView {
            url: self.resolver.resolve_url(&record.storage_locator),
            id: record.id,
            original_filename: record.original_filename,
            stored_filename: record.stored_filename,
            description: record.description,
            tags: record.tags,
            created_at: Some(record.created_at),
            view_count: record.view_count,
            score: None,
        }
    }

    fn indexed_view(&self, image: IndexedImage) -> ImageView {
        ImageView {
            url: self.resolver.resolve_url(&image.storage_locator),
            id: image.id,
            original_filename: image.original_filename,
            stored_filename: image.stored_filename,
            description: image.description,
            tags: image.tags,
            created_at: image.created_at,
            view_count: image.view_count,
            score: image.score,
        }
    }
}
