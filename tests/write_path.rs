mod common;

use common::{FailingStore, Harness, PNG_BYTES};
use image_catalog::error::AppError;
use image_catalog::indexer::IndexingGateway;
use image_catalog::processor::Upload;
use image_catalog::search::SearchIndex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn upload(description: &str, tags: &str) -> Upload {
    Upload {
        original_filename: "cat.png".into(),
        description: Some(description.into()),
        tags: Some(tags.into()),
        bytes: PNG_BYTES.to_vec(),
    }
}

#[tokio::test]
async fn upload_is_readable_from_store_with_all_fields() {
    let h = Harness::new().await;
    let record = h
        .state
        .uploads
        .process(upload("a cat in the park", "cat, outdoor, cat"))
        .await
        .unwrap();

    let stored = h.store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored, record);
    assert_eq!(stored.original_filename, "cat.png");
    assert_ne!(stored.stored_filename, "cat.png");
    assert_eq!(stored.description.as_deref(), Some("a cat in the park"));
    assert_eq!(stored.tags, vec!["cat", "outdoor"]);
    assert_eq!(stored.view_count, 0);

    let blob = std::path::Path::new(&h.config.media_directory).join(&stored.storage_locator);
    assert_eq!(std::fs::read(blob).unwrap(), PNG_BYTES);
    assert_eq!(h.index.count().await.unwrap(), 1);
}

#[tokio::test]
async fn index_failure_does_not_fail_upload() {
    let h = Harness::new().await;
    h.index.fail_writes.store(true, Ordering::SeqCst);

    let record = h
        .state
        .uploads
        .process(upload("a cat in the park", "cat"))
        .await
        .expect("upload must succeed when only the index write fails");

    assert!(h.store.get(record.id).await.unwrap().is_some());
    assert_eq!(h.index.count().await.unwrap(), 0);
    let view = h.state.router.get(record.id).await.unwrap();
    assert_eq!(view.id, record.id);
}

#[tokio::test]
async fn missing_index_does_not_fail_upload() {
    let h = Harness::new().await;
    h.index.delete_index().await.unwrap();

    let record = h.state.uploads.process(upload("x", "")).await.unwrap();
    assert!(h.store.get(record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn slow_index_is_cut_off_by_timeout() {
    let h = Harness::new().await;
    *h.index.write_delay.lock().unwrap() = Some(Duration::from_secs(30));

    let started = std::time::Instant::now();
    let record = h.state.uploads.process(upload("slow", "cat")).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(h.store.get(record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn gateway_reports_timeout_as_error() {
    let h = Harness::new().await;
    *h.index.write_delay.lock().unwrap() = Some(Duration::from_secs(30));
    let gateway = IndexingGateway::new(h.index.clone(), Duration::from_millis(20));
    let record = h
        .store
        .create(common::new_image("a", "b", &[]))
        .await
        .unwrap();

    let err = gateway.upsert(&record).await.unwrap_err();
    assert!(matches!(err, image_catalog::error::IndexError::Timeout(_)));
}

#[tokio::test]
async fn gateway_delete_tolerates_missing_document() {
    let h = Harness::new().await;
    let gateway = IndexingGateway::new(h.index.clone(), Duration::from_secs(5));
    let record = h
        .store
        .create(common::new_image("a", "b", &["cat"]))
        .await
        .unwrap();

    gateway.upsert(&record).await.unwrap();
    assert_eq!(h.index.count().await.unwrap(), 1);
    gateway.delete(record.id).await.unwrap();
    gateway.delete(record.id).await.unwrap();
    assert_eq!(h.index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn store_failure_fails_upload_and_skips_index() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::with_store(dir, Arc::new(FailingStore)).await;

    let err = h.state.uploads.process(upload("x", "cat")).await.unwrap_err();
    assert!(matches!(err, AppError::Store(_)));
    assert_eq!(h.index.count().await.unwrap(), 0);

    // The blob written ahead of the record is cleaned up again.
    let images = std::path::Path::new(&h.config.media_directory).join("images");
    let left_over = std::fs::read_dir(&images)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(left_over, 0);
}

#[tokio::test]
async fn non_image_upload_is_rejected_before_any_write() {
    let h = Harness::new().await;
    let mut bad = upload("x", "cat");
    bad.bytes = b"plain text".to_vec();

    let err = h.state.uploads.process(bad).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert!(h.store.list_all().await.unwrap().is_empty());
}
