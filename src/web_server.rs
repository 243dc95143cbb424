use crate::config::AppConfig;
use crate::error::AppError;
use crate::indexer::IndexingGateway;
use crate::processor::{Upload, UploadProcessor};
use crate::reindex::ReindexCoordinator;
use crate::router::QueryRouter;
use crate::search::SearchIndex;
use crate::storage::{BlobStore, StorageResolver};
use crate::store::RecordStore;
use actix_web::{web, App, HttpResponse, HttpServer};
use serde::Deserialize;
use std::sync::Arc;

/// Components shared by every worker, built once at startup.
pub struct AppState {
    pub uploads: UploadProcessor,
    pub router: QueryRouter,
    pub reindex: ReindexCoordinator,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn RecordStore>,
        index: Arc<dyn SearchIndex>,
        blobs: Arc<dyn BlobStore>,
        resolver: Arc<dyn StorageResolver>,
    ) -> Self {
        let gateway = IndexingGateway::new(index.clone(), config.index_timeout());
        Self {
            uploads: UploadProcessor::new(blobs, store.clone(), gateway.clone()),
            router: QueryRouter::new(
                store.clone(),
                index,
                resolver,
                config.recent_limit,
                config.search_size,
            ),
            reindex: ReindexCoordinator::new(store, gateway),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub filename: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestParams {
    pub prefix: Option<String>,
}

async fn upload_image(
    state: web::Data<AppState>,
    params: web::Query<UploadParams>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let params = params.into_inner();
    log::debug!("Received upload of {} bytes: {:?}", body.len(), params);
    let upload = Upload {
        original_filename: params.filename.unwrap_or_default(),
        description: params.description,
        tags: params.tags,
        bytes: body.to_vec(),
    };
    let record = state.uploads.process(upload).await?;
    Ok(HttpResponse::Ok().json(state.router.record_view(record)))
}

async fn search_images(
    state: web::Data<AppState>,
    params: web::Query<SearchParams>,
) -> Result<HttpResponse, AppError> {
    log::debug!("Received search request: {:?}", params);
    let images = state
        .router
        .search(params.q.as_deref(), params.tags.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(images))
}

async fn get_image(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id: i64 = path
        .into_inner()
        .parse()
        .map_err(|_| AppError::BadRequest("invalid image id".into()))?;
    log::debug!("Received request for image {}", id);
    Ok(HttpResponse::Ok().json(state.router.get(id).await?))
}

async fn suggest_tags(
    state: web::Data<AppState>,
    params: web::Query<SuggestParams>,
) -> Result<HttpResponse, AppError> {
    let prefix = params.prefix.as_deref().unwrap_or_default();
    Ok(HttpResponse::Ok().json(state.router.suggest_tags(prefix).await?))
}

async fn reindex(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    log::info!("Reindex requested over HTTP");
    let report = state.reindex.run().await?;
    Ok(HttpResponse::Ok().json(report))
}

async fn not_found() -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound("no such route".into()))
}

/// Mounts the API on an actix `App`. Shared with tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/images", web::post().to(upload_image))
            .route("/images/search", web::get().to(search_images))
            .route("/images/{id}", web::get().to(get_image))
            .route("/tags/suggest", web::get().to(suggest_tags))
            .route("/admin/reindex", web::post().to(reindex)),
    );
}

pub async fn start_web_server(config: Arc<AppConfig>, state: Arc<AppState>) -> std::io::Result<()> {
    let port = config.web_port;
    let state = web::Data::from(state);
    let media_directory = config.media_directory.clone();
    let max_upload_bytes = config.max_upload_bytes;

    log::info!("Starting web server on port: {}", port);
    log::debug!("Serving media files from {} directory.", media_directory);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(max_upload_bytes))
            .configure(configure)
            .service(actix_files::Files::new("/media", &media_directory))
            .default_service(web::to(not_found))
    })
    .bind(format!("0.0.0.0:{}", port))?
    .run()
    .await
}
