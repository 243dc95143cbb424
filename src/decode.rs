//! Lenient decoding of search hits.
//!
//! Search engines do not always hand back what was indexed: integers may come
//! back as floats or strings and dates as epoch numbers. Each field is decoded
//! on its own; a field that cannot be decoded falls back to its default and is
//! logged, without failing the rest of the hit or the response.

use crate::search::SearchHit;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::document::fields;

/// Largest integer a 64-bit float represents exactly.
const MAX_SAFE_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// An image as read back from the search index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedImage {
    pub id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub storage_locator: String,
    pub created_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    pub score: Option<f64>,
}

pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().and_then(float_to_i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64))
        }
        _ => None,
    }
}

fn float_to_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_FLOAT_INT {
        Some(f as i64)
    } else {
        None
    }
}

/// Accepts RFC 3339 strings and epoch milliseconds, as a number or a string.
pub fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    if let Value::String(s) = value {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(s.trim()) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    as_i64(value).and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Arrays of scalars, or a lone scalar where an array was expected.
pub fn as_strings(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(as_string).collect()),
        other => as_string(other).map(|s| vec![s]),
    }
}

struct FieldReader<'a> {
    source: &'a Map<String, Value>,
    doc_id: &'a str,
}

impl<'a> FieldReader<'a> {
    fn get<T>(&self, name: &str, decode: fn(&Value) -> Option<T>) -> Option<T> {
        match self.source.get(name) {
            None | Some(Value::Null) => {
                log::trace!("Document {} has no '{}' field", self.doc_id, name);
                None
            }
            Some(value) => {
                let decoded = decode(value);
                if decoded.is_none() {
                    log::warn!(
                        "Dropping field '{}' of document {}: unexpected value {}",
                        name,
                        self.doc_id,
                        value
                    );
                }
                decoded
            }
        }
    }
}

/// Decodes one hit. Only a hit without any recoverable id is discarded.
pub fn decode_hit(hit: &SearchHit) -> Option<IndexedImage> {
    let empty = Map::new();
    let source = match &hit.source {
        Value::Object(map) => map,
        other => {
            log::warn!("Document {} has a non-object source: {}", hit.id, other);
            &empty
        }
    };
    let reader = FieldReader {
        source,
        doc_id: &hit.id,
    };

    let id = match reader
        .get(fields::ID, as_i64)
        .or_else(|| hit.id.trim().parse::<i64>().ok())
    {
        Some(id) => id,
        None => {
            log::warn!("Skipping hit with unusable document id '{}'", hit.id);
            return None;
        }
    };

    Some(IndexedImage {
        id,
        original_filename: reader
            .get(fields::ORIGINAL_FILENAME, as_string)
            .unwrap_or_default(),
        stored_filename: reader
            .get(fields::STORED_FILENAME, as_string)
            .unwrap_or_default(),
        description: reader.get(fields::DESCRIPTION, as_string),
        tags: reader.get(fields::TAGS, as_strings).unwrap_or_default(),
        storage_locator: reader
            .get(fields::STORAGE_LOCATOR, as_string)
            .unwrap_or_default(),
        created_at: reader.get(fields::CREATED_AT, as_datetime),
        view_count: reader.get(fields::VIEW_COUNT, as_i64).unwrap_or_default(),
        score: hit.score,
    })
}
