// src/metadata.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the record store. The store is the only owner of these.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub storage_locator: String,
    pub created_at: DateTime<Utc>,
    pub view_count: i64,
}

/// Fields supplied by the write path. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub original_filename: String,
    pub stored_filename: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub storage_locator: String,
}

/// External shape of an image, whichever store it was read from.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ImageView {
    pub id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Splits a comma separated tag list, trimming entries and dropping blanks and repeats.
pub fn parse_tags(raw: &str) -> Vec<String> {
    normalize_tags(raw.split(','))
}

pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Treats empty and whitespace-only input as absent.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
