use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

const BASE_INDEX_NAME: &str = "images";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    Elasticsearch,
    Tantivy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: SearchEngine,
    pub elasticsearch_url: String,
    #[serde(default)]
    pub elasticsearch_username: Option<String>,
    #[serde(default)]
    pub elasticsearch_password: Option<String>,
    /// Directory holding the embedded index. In-memory when unset.
    #[serde(default)]
    pub tantivy_index_path: Option<String>,
    /// Lets several logical catalogs share one search cluster.
    #[serde(default)]
    pub index_prefix: Option<String>,
    pub database_path: String,
    pub media_directory: String,
    pub public_base_url: String,
    pub web_port: u16,
    pub log_level: String,
    pub index_timeout_ms: u64,
    pub recent_limit: usize,
    pub search_size: usize,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("IMAGERR"))
            .build()?;

        s.try_deserialize()
    }

    pub fn index_name(&self) -> String {
        match self.index_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => format!("{}-{}", prefix, BASE_INDEX_NAME),
            _ => BASE_INDEX_NAME.to_string(),
        }
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }
}
