#![allow(dead_code)]

use async_trait::async_trait;
use image_catalog::config::{AppConfig, SearchEngine};
use image_catalog::document::{IndexMapping, SearchDocument, SearchQuery};
use image_catalog::error::{IndexError, StoreError};
use image_catalog::metadata::{ImageRecord, NewImage};
use image_catalog::search::{SearchHit, SearchIndex};
use image_catalog::search_clients::tantivy::TantivyIndex;
use image_catalog::storage::LocalStorage;
use image_catalog::store::{RecordStore, SqliteStore};
use image_catalog::web_server::AppState;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

pub fn test_config(dir: &Path) -> AppConfig {
    AppConfig {
        engine: SearchEngine::Tantivy,
        elasticsearch_url: "http://127.0.0.1:9".into(),
        elasticsearch_username: None,
        elasticsearch_password: None,
        tantivy_index_path: None,
        index_prefix: Some("test".into()),
        database_path: dir.join("catalog.db").to_string_lossy().to_string(),
        media_directory: dir.join("media").to_string_lossy().to_string(),
        public_base_url: "http://media.test/media".into(),
        web_port: 0,
        log_level: "debug".into(),
        index_timeout_ms: 500,
        recent_limit: 9,
        search_size: 50,
        max_upload_bytes: 1024 * 1024,
    }
}

/// A search index whose writes can be made to fail or stall.
pub struct FaultyIndex {
    pub inner: TantivyIndex,
    pub fail_writes: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_on_id: Mutex<Option<i64>>,
    pub write_delay: Mutex<Option<Duration>>,
    pub raw_hits: Mutex<Option<Vec<SearchHit>>>,
}

impl FaultyIndex {
    pub fn new(name: &str) -> Self {
        Self {
            inner: TantivyIndex::in_memory(name),
            fail_writes: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_on_id: Mutex::new(None),
            write_delay: Mutex::new(None),
            raw_hits: Mutex::new(None),
        }
    }

    fn rejected(&self, what: &str) -> IndexError {
        IndexError::Rejected {
            index: self.inner.index_name().to_string(),
            status: 503,
            body: format!("{} refused", what),
        }
    }
}

#[async_trait]
impl SearchIndex for FaultyIndex {
    fn index_name(&self) -> &str {
        self.inner.index_name()
    }

    async fn index_exists(&self) -> Result<bool, IndexError> {
        self.inner.index_exists().await
    }

    async fn create_index(&self, mapping: &IndexMapping) -> Result<(), IndexError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(self.rejected("create"));
        }
        self.inner.create_index(mapping).await
    }

    async fn delete_index(&self) -> Result<(), IndexError> {
        self.inner.delete_index().await
    }

    async fn index_document(&self, document: &SearchDocument) -> Result<(), IndexError> {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(self.rejected("upsert"));
        }
        if *self.fail_on_id.lock().unwrap() == Some(document.id) {
            return Err(self.rejected("upsert"));
        }
        self.inner.index_document(document).await
    }

    async fn delete_document(&self, id: i64) -> Result<(), IndexError> {
        self.inner.delete_document(id).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, IndexError> {
        let canned = self.raw_hits.lock().unwrap().clone();
        match canned {
            Some(hits) => Ok(hits),
            None => self.inner.search(query).await,
        }
    }

    async fn suggest_tags(&self, prefix: &str, size: usize) -> Result<Vec<String>, IndexError> {
        self.inner.suggest_tags(prefix, size).await
    }

    async fn refresh(&self) -> Result<(), IndexError> {
        self.inner.refresh().await
    }

    async fn count(&self) -> Result<u64, IndexError> {
        self.inner.count().await
    }
}

/// A record store that is down.
pub struct FailingStore;

fn store_down() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "store is down",
    ))
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn create(&self, _image: NewImage) -> Result<ImageRecord, StoreError> {
        Err(store_down())
    }

    async fn get(&self, _id: i64) -> Result<Option<ImageRecord>, StoreError> {
        Err(store_down())
    }

    async fn list_recent(&self, _limit: usize) -> Result<Vec<ImageRecord>, StoreError> {
        Err(store_down())
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        Err(store_down())
    }
}

/// Everything a test needs, wired like `main` does it.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: AppConfig,
    pub store: Arc<dyn RecordStore>,
    pub index: Arc<FaultyIndex>,
    pub storage: Arc<LocalStorage>,
    pub state: Arc<AppState>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn RecordStore> =
            Arc::new(SqliteStore::open(dir.path().join("catalog.db")).unwrap());
        Self::with_store(dir, store).await
    }

    pub async fn with_store(dir: tempfile::TempDir, store: Arc<dyn RecordStore>) -> Self {
        let config = test_config(dir.path());
        let index = Arc::new(FaultyIndex::new(&config.index_name()));
        index.create_index(&IndexMapping::images()).await.unwrap();
        let storage = Arc::new(LocalStorage::new(
            &config.media_directory,
            &config.public_base_url,
        ));
        let state = Arc::new(AppState::new(
            &config,
            store.clone(),
            index.clone(),
            storage.clone(),
            storage.clone(),
        ));
        Self {
            dir,
            config,
            store,
            index,
            storage,
            state,
        }
    }
}

pub fn new_image(name: &str, description: &str, tags: &[&str]) -> NewImage {
    NewImage {
        original_filename: format!("{}.jpg", name),
        stored_filename: format!("{}-{}.jpg", name, uuid_like(name)),
        description: Some(description.to_string()),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        storage_locator: format!("images/{}.jpg", name),
    }
}

fn uuid_like(name: &str) -> String {
    format!("{:x}", name.bytes().fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64)))
}
