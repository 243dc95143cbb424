use crate::error::AppError;
use crate::indexer::IndexingGateway;
use crate::metadata::{non_blank, parse_tags, ImageRecord, NewImage};
use crate::storage::BlobStore;
use crate::store::RecordStore;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Upload {
    pub original_filename: String,
    pub description: Option<String>,
    /// Comma separated.
    pub tags: Option<String>,
    pub bytes: Vec<u8>,
}

/// The write path: blob, then record, then a best-effort index upsert.
pub struct UploadProcessor {
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn RecordStore>,
    gateway: IndexingGateway,
}

impl UploadProcessor {
    pub fn new(blobs: Arc<dyn BlobStore>, store: Arc<dyn RecordStore>, gateway: IndexingGateway) -> Self {
        Self {
            blobs,
            store,
            gateway,
        }
    }

    /// Succeeds once the record is committed, whatever happens to the index upsert.
    pub async fn process(&self, upload: Upload) -> Result<ImageRecord, AppError> {
        let original_filename = sanitize_filename(&upload.original_filename)?;
        let stored_filename = stored_filename_for(&original_filename, &upload.bytes)?;
        log::info!("Processing upload of {} as {}", original_filename, stored_filename);

        let storage_locator = self.blobs.put(&stored_filename, upload.bytes).await?;

        let created = self
            .store
            .create(NewImage {
                original_filename,
                stored_filename,
                description: non_blank(upload.description.as_deref()).map(str::to_string),
                tags: upload.tags.as_deref().map(parse_tags).unwrap_or_default(),
                storage_locator: storage_locator.clone(),
            })
            .await;
        let record = match created {
            Ok(record) => record,
            Err(e) => {
                log::error!("Failed to save image record: {}", e);
                if let Err(cleanup) = self.blobs.remove(&storage_locator).await {
                    log::warn!("Could not remove orphaned blob {}: {}", storage_locator, cleanup);
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.gateway.upsert(&record).await {
            log::warn!(
                "Image {} saved but not indexed, it will be picked up by the next reindex: {}",
                record.id,
                e
            );
        }

        Ok(record)
    }
}

fn sanitize_filename(raw: &str) -> Result<String, AppError> {
    Path::new(raw.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("a filename is required".into()))
}

/// A fresh UUID name that keeps the original's image extension.
fn stored_filename_for(original_filename: &str, bytes: &[u8]) -> Result<String, AppError> {
    if bytes.is_empty() {
        return Err(AppError::BadRequest("no file uploaded".into()));
    }
    let format = image::guess_format(bytes)
        .map_err(|_| AppError::BadRequest("uploaded file is not a recognised image".into()))?;

    let declared = mime_guess::from_path(original_filename).first();
    let extension = match declared {
        Some(mime) if mime.type_() == mime::IMAGE => Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase),
        Some(mime) => {
            return Err(AppError::BadRequest(format!(
                "{} is not an image type",
                mime
            )))
        }
        None => None,
    };
    let extension = extension
        .or_else(|| format.extensions_str().first().map(|e| e.to_string()))
        .unwrap_or_else(|| "img".to_string());

    Ok(format!("{}.{}", Uuid::new_v4(), extension))
}
