use anyhow::Result;
use clap::{Parser, Subcommand};
use image_catalog::config::{AppConfig, SearchEngine};
use image_catalog::document::IndexMapping;
use image_catalog::search::{ensure_index_exists, SearchIndex};
use image_catalog::search_clients::{elasticsearch::ElasticsearchIndex, tantivy::TantivyIndex};
use image_catalog::storage::LocalStorage;
use image_catalog::store::{RecordStore, SqliteStore};
use image_catalog::web_server::{self, AppState};
use log::info;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "image_catalog", about = "Image catalog with a rebuildable search index")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Drop the search index and rebuild it from the record store.
    Reindex,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::new()?;

    // Initialize env_logger based on config.log_level
    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting image_catalog");

    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::open(&config.database_path)?);
    let index: Arc<dyn SearchIndex> = match config.engine {
        SearchEngine::Elasticsearch => Arc::new(ElasticsearchIndex::new(&config)?),
        SearchEngine::Tantivy => Arc::new(TantivyIndex::new(&config)?),
    };
    let storage = Arc::new(LocalStorage::new(&config.media_directory, &config.public_base_url));
    let state = Arc::new(AppState::new(
        &config,
        store,
        index.clone(),
        storage.clone(),
        storage,
    ));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Reindex => {
            let report = state.reindex.run().await?;
            info!("Reindexed {} records into '{}'", report.indexed, index.index_name());
        }
        Command::Serve => {
            match ensure_index_exists(index.as_ref(), &IndexMapping::images()).await {
                // A fresh index knows nothing of records already in the store.
                Ok(true) => match state.reindex.run().await {
                    Ok(report) => info!("Populated new index with {} records", report.indexed),
                    Err(e) => log::error!("Initial reindex failed: {}", e),
                },
                Ok(false) => {}
                Err(e) => log::error!("Search index unavailable at startup: {}", e),
            }
            if let Err(e) = web_server::start_web_server(Arc::new(config), state).await {
                log::error!("Web server error: {}", e);
            }
        }
    }

    info!("image_catalog finished");

    Ok(())
}
