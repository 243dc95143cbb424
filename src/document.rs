//! Search document layout, the index mapping and the query builder.
//!
//! Both search backends derive their schema and queries from the types in
//! this module, so field names and boosts are defined exactly once.

use crate::metadata::ImageRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

pub mod fields {
    pub const ID: &str = "id";
    pub const ORIGINAL_FILENAME: &str = "original_filename";
    pub const STORED_FILENAME: &str = "stored_filename";
    pub const DESCRIPTION: &str = "description";
    pub const TAGS: &str = "tags";
    pub const STORAGE_LOCATOR: &str = "storage_locator";
    pub const CREATED_AT: &str = "created_at";
    pub const VIEW_COUNT: &str = "view_count";
}

pub const TAG_BOOST: f32 = 2.0;
pub const DESCRIPTION_BOOST: f32 = 1.0;
pub const DATE_FORMAT: &str = "strict_date_optional_time||epoch_millis";
pub const TAG_SUGGESTION_AGG: &str = "tag_suggestions";
/// Elasticsearch's default `index.max_result_window`.
pub const MAX_RESULT_WINDOW: usize = 10_000;

/// Denormalized copy of an [`ImageRecord`], keyed by the record id.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SearchDocument {
    pub id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub storage_locator: String,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: DateTime<Utc>,
    pub view_count: i64,
}

impl SearchDocument {
    pub fn document_id(&self) -> String {
        self.id.to_string()
    }
}

impl From<&ImageRecord> for SearchDocument {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id,
            original_filename: record.original_filename.clone(),
            stored_filename: record.stored_filename.clone(),
            description: record.description.clone(),
            tags: record.tags.clone(),
            storage_locator: record.storage_locator.clone(),
            created_at: record.created_at,
            view_count: record.view_count,
        }
    }
}

fn serialize_date<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_date(date))
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Exact match, not tokenized.
    Keyword,
    /// Analyzed full text.
    Text,
    Long,
    Date,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexMapping {
    pub fields: Vec<(&'static str, FieldKind)>,
}

impl IndexMapping {
    pub fn images() -> Self {
        Self {
            fields: vec![
                (fields::ID, FieldKind::Long),
                (fields::ORIGINAL_FILENAME, FieldKind::Keyword),
                (fields::STORED_FILENAME, FieldKind::Keyword),
                (fields::DESCRIPTION, FieldKind::Text),
                (fields::TAGS, FieldKind::Keyword),
                (fields::STORAGE_LOCATOR, FieldKind::Keyword),
                (fields::CREATED_AT, FieldKind::Date),
                (fields::VIEW_COUNT, FieldKind::Long),
            ],
        }
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, kind)| *kind)
    }

    pub fn to_elasticsearch(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, kind)| {
                let property = match kind {
                    FieldKind::Keyword => json!({ "type": "keyword" }),
                    FieldKind::Text => json!({ "type": "text" }),
                    FieldKind::Long => json!({ "type": "long" }),
                    FieldKind::Date => json!({ "type": "date", "format": DATE_FORMAT }),
                };
                (name.to_string(), property)
            })
            .collect();
        json!({
            "mappings": {
                "dynamic": "strict",
                "properties": properties
            }
        })
    }
}

/// A search that has at least one of free text or tag filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub tags: Vec<String>,
    pub size: usize,
}

impl SearchQuery {
    /// Returns `None` when neither text nor tags carry anything to match on.
    /// `size` is clamped to `1..=MAX_RESULT_WINDOW`.
    pub fn new(text: Option<&str>, tags: Vec<String>, size: usize) -> Option<Self> {
        let text = crate::metadata::non_blank(text).map(str::to_string);
        if text.is_none() && tags.is_empty() {
            return None;
        }
        let size = size.clamp(1, MAX_RESULT_WINDOW);
        Some(Self { text, tags, size })
    }

    pub fn to_elasticsearch(&self) -> Value {
        let mut should = Vec::new();
        if !self.tags.is_empty() {
            should.push(json!({
                "terms": {
                    (fields::TAGS): self.tags,
                    "boost": TAG_BOOST
                }
            }));
        }
        if let Some(text) = &self.text {
            should.push(json!({
                "match": {
                    (fields::DESCRIPTION): {
                        "query": text,
                        "fuzziness": "AUTO",
                        "boost": DESCRIPTION_BOOST
                    }
                }
            }));
        }
        json!({
            "size": self.size,
            "query": {
                "bool": {
                    "should": should,
                    "minimum_should_match": 1
                }
            }
        })
    }
}

/// Edit distance allowed for a term, following Elasticsearch's `AUTO` fuzziness.
pub fn fuzzy_distance(term: &str) -> u8 {
    match term.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// Prefix-based tag autocomplete. Deliberately separate from the exact tag filter.
pub fn tag_suggestion_query(prefix: &str, size: usize) -> Value {
    json!({
        "size": 0,
        "aggs": {
            TAG_SUGGESTION_AGG: {
                "terms": {
                    "field": fields::TAGS,
                    "include": format!("{}.*", escape_regex(prefix.trim())),
                    "size": size
                }
            }
        }
    })
}

fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(
            c,
            '.' | '?' | '+' | '*' | '|' | '{' | '}' | '[' | ']' | '(' | ')' | '"' | '\\' | '#'
                | '@' | '&' | '<' | '>' | '~'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
