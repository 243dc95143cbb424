pub mod config;
pub mod decode;
pub mod document;
pub mod error;
pub mod indexer;
pub mod metadata;
pub mod processor;
pub mod reindex;
pub mod router;
pub mod search;
pub mod search_clients;
pub mod storage;
pub mod store;
pub mod web_server;
