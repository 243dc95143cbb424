use crate::config::AppConfig;
use crate::document::{
    fields, format_date, fuzzy_distance, FieldKind, IndexMapping, SearchDocument, SearchQuery,
    DESCRIPTION_BOOST, TAG_BOOST,
};
use crate::error::IndexError;
use crate::search::{SearchHit, SearchIndex};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    DateOptions, DatePrecision, Field, IndexRecordOption, Schema, INDEXED, STORED, STRING, TEXT,
};
use tantivy::{DateTime, Document, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

const WRITER_HEAP_BYTES: usize = 50_000_000;

struct Fields {
    id: Field,
    original_filename: Field,
    stored_filename: Field,
    description: Field,
    tags: Field,
    storage_locator: Field,
    created_at: Field,
    view_count: Field,
}

impl Fields {
    fn resolve(schema: &Schema) -> Result<Self, IndexError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .ok_or_else(|| IndexError::Malformed(format!("schema has no field '{}'", name)))
        };
        Ok(Self {
            id: field(fields::ID)?,
            original_filename: field(fields::ORIGINAL_FILENAME)?,
            stored_filename: field(fields::STORED_FILENAME)?,
            description: field(fields::DESCRIPTION)?,
            tags: field(fields::TAGS)?,
            storage_locator: field(fields::STORAGE_LOCATOR)?,
            created_at: field(fields::CREATED_AT)?,
            view_count: field(fields::VIEW_COUNT)?,
        })
    }
}

/// An open index with its single writer.
struct Handle {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl Handle {
    fn new(index: Index) -> Result<Self, IndexError> {
        let fields = Fields::resolve(&index.schema())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        Ok(Self {
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    /// Apply `ops` under the writer lock, commit, and make the result searchable.
    fn write<F>(&self, ops: F) -> Result<(), IndexError>
    where
        F: FnOnce(&IndexWriter, &Fields) -> Result<(), IndexError>,
    {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        ops(&*writer, &self.fields)?;
        writer.commit()?;
        self.reader.reload()?;
        log::trace!("Tantivy index writer committed changes.");
        Ok(())
    }
}

pub fn build_schema(mapping: &IndexMapping) -> Schema {
    let mut builder = Schema::builder();
    for (name, kind) in &mapping.fields {
        match kind {
            FieldKind::Keyword => builder.add_text_field(name, STRING | STORED),
            FieldKind::Text => builder.add_text_field(name, TEXT | STORED),
            FieldKind::Long => builder.add_i64_field(name, INDEXED | STORED),
            FieldKind::Date => builder.add_date_field(
                name,
                DateOptions::from(INDEXED | STORED).set_precision(DatePrecision::Microseconds),
            ),
        };
    }
    builder.build()
}

/// Splits text the way the default analyzer does: alphanumeric runs, lowercased.
fn analyze(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn to_tantivy_document(doc: &SearchDocument, f: &Fields) -> Document {
    let mut out = Document::default();
    out.add_i64(f.id, doc.id);
    out.add_text(f.original_filename, &doc.original_filename);
    out.add_text(f.stored_filename, &doc.stored_filename);
    if let Some(description) = &doc.description {
        out.add_text(f.description, description);
    }
    for tag in &doc.tags {
        out.add_text(f.tags, tag);
    }
    out.add_text(f.storage_locator, &doc.storage_locator);
    out.add_date(
        f.created_at,
        DateTime::from_timestamp_micros(doc.created_at.timestamp_micros()),
    );
    out.add_i64(f.view_count, doc.view_count);
    out
}

/// Stored fields as a JSON source, shaped like an Elasticsearch `_source`.
fn to_source(doc: &Document, f: &Fields) -> Value {
    let mut source = Map::new();
    let text = |field: Field| doc.get_first(field).and_then(|v| v.as_text()).map(str::to_string);
    if let Some(id) = doc.get_first(f.id).and_then(|v| v.as_i64()) {
        source.insert(fields::ID.into(), json!(id));
    }
    for (name, field) in [
        (fields::ORIGINAL_FILENAME, f.original_filename),
        (fields::STORED_FILENAME, f.stored_filename),
        (fields::DESCRIPTION, f.description),
        (fields::STORAGE_LOCATOR, f.storage_locator),
    ] {
        if let Some(value) = text(field) {
            source.insert(name.into(), json!(value));
        }
    }
    let tags: Vec<&str> = doc.get_all(f.tags).filter_map(|v| v.as_text()).collect();
    source.insert(fields::TAGS.into(), json!(tags));
    let created_at = doc
        .get_first(f.created_at)
        .and_then(|v| v.as_date())
        .and_then(|date| Utc.timestamp_micros(date.into_timestamp_micros()).single());
    if let Some(created_at) = created_at {
        source.insert(fields::CREATED_AT.into(), json!(format_date(&created_at)));
    }
    if let Some(views) = doc.get_first(f.view_count).and_then(|v| v.as_i64()) {
        source.insert(fields::VIEW_COUNT.into(), json!(views));
    }
    Value::Object(source)
}

fn build_query(query: &SearchQuery, f: &Fields) -> BooleanQuery {
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    if !query.tags.is_empty() {
        let tag_terms: Vec<(Occur, Box<dyn Query>)> = query
            .tags
            .iter()
            .map(|tag| {
                let term = Term::from_field_text(f.tags, tag);
                let clause: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                (Occur::Should, clause)
            })
            .collect();
        clauses.push((
            Occur::Should,
            Box::new(BoostQuery::new(Box::new(BooleanQuery::new(tag_terms)), TAG_BOOST)),
        ));
    }
    if let Some(text) = &query.text {
        let text_terms: Vec<(Occur, Box<dyn Query>)> = analyze(text)
            .into_iter()
            .map(|token| {
                let distance = fuzzy_distance(&token);
                let term = Term::from_field_text(f.description, &token);
                let clause: Box<dyn Query> = Box::new(FuzzyTermQuery::new(term, distance, true));
                (Occur::Should, clause)
            })
            .collect();
        if !text_terms.is_empty() {
            clauses.push((
                Occur::Should,
                Box::new(BoostQuery::new(
                    Box::new(BooleanQuery::new(text_terms)),
                    DESCRIPTION_BOOST,
                )),
            ));
        }
    }
    BooleanQuery::new(clauses)
}

/// Embedded search index. Lives in memory unless a root directory is given,
/// in which case each named index gets its own subdirectory.
pub struct TantivyIndex {
    name: String,
    root: Option<PathBuf>,
    state: RwLock<Option<Arc<Handle>>>,
}

impl TantivyIndex {
    pub fn new(config: &AppConfig) -> Result<Self, IndexError> {
        Self::open(config.index_name(), config.tantivy_index_path.as_ref().map(PathBuf::from))
    }

    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: None,
            state: RwLock::new(None),
        }
    }

    pub fn open(name: impl Into<String>, root: Option<PathBuf>) -> Result<Self, IndexError> {
        let name = name.into();
        let mut handle = None;
        if let Some(root) = &root {
            let dir = root.join(&name);
            log::debug!("Initializing Tantivy index '{}' at {:?}", name, dir);
            if dir.join("meta.json").exists() {
                handle = Some(Arc::new(Handle::new(Index::open_in_dir(&dir)?)?));
                log::debug!("Opened existing Tantivy index at {:?}", dir);
            } else {
                log::info!("Tantivy index not found at {:?}.", dir);
            }
        }
        Ok(Self {
            name,
            root,
            state: RwLock::new(handle),
        })
    }

    fn handle(&self) -> Option<Arc<Handle>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require(&self) -> Result<Arc<Handle>, IndexError> {
        self.handle()
            .ok_or_else(|| IndexError::Missing(self.name.clone()))
    }
}

#[async_trait]
impl SearchIndex for TantivyIndex {
    fn index_name(&self) -> &str {
        &self.name
    }

    async fn index_exists(&self) -> Result<bool, IndexError> {
        Ok(self.handle().is_some())
    }

    async fn create_index(&self, mapping: &IndexMapping) -> Result<(), IndexError> {
        if self.handle().is_some() {
            return Err(IndexError::Rejected {
                index: self.name.clone(),
                status: 400,
                body: "resource_already_exists".into(),
            });
        }
        let schema = build_schema(mapping);
        let dir = self.root.as_ref().map(|root| root.join(&self.name));
        let handle = tokio::task::spawn_blocking(move || {
            let index = match dir {
                Some(dir) => {
                    std::fs::create_dir_all(&dir)?;
                    Index::create_in_dir(&dir, schema)?
                }
                None => Index::create_in_ram(schema),
            };
            Handle::new(index)
        })
        .await??;
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handle));
        log::debug!("Tantivy index '{}' created.", self.name);
        Ok(())
    }

    async fn delete_index(&self) -> Result<(), IndexError> {
        let previous = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(previous);
        if let Some(root) = &self.root {
            let dir = root.join(&self.name);
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir).await?;
            }
        }
        log::debug!("Tantivy index '{}' deleted.", self.name);
        Ok(())
    }

    async fn index_document(&self, document: &SearchDocument) -> Result<(), IndexError> {
        let handle = self.require()?;
        let document = document.clone();
        tokio::task::spawn_blocking(move || {
            log::debug!("Indexing document {} into Tantivy", document.id);
            handle.write(|writer, f| {
                writer.delete_term(Term::from_field_i64(f.id, document.id));
                writer.add_document(to_tantivy_document(&document, f))?;
                Ok(())
            })
        })
        .await?
    }

    async fn delete_document(&self, id: i64) -> Result<(), IndexError> {
        let handle = match self.handle() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        tokio::task::spawn_blocking(move || {
            handle.write(|writer, f| {
                writer.delete_term(Term::from_field_i64(f.id, id));
                Ok(())
            })?;
            log::debug!("Deleted document with id: {}", id);
            Ok::<(), IndexError>(())
        })
        .await?
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, IndexError> {
        let handle = self.require()?;
        let query = query.clone();
        tokio::task::spawn_blocking(move || {
            log::debug!("Searching Tantivy with query: {:?}", query);
            let f = &handle.fields;
            let searcher = handle.reader.searcher();
            let top_docs = searcher.search(
                &build_query(&query, f),
                &TopDocs::with_limit(query.size),
            )?;
            let mut hits = Vec::with_capacity(top_docs.len());
            for (score, address) in top_docs {
                let doc = searcher.doc(address)?;
                let source = to_source(&doc, f);
                hits.push(SearchHit {
                    id: source[fields::ID].to_string(),
                    score: Some(f64::from(score)),
                    source,
                });
            }
            log::debug!("Found {} hits in Tantivy.", hits.len());
            Ok::<_, IndexError>(hits)
        })
        .await?
    }

    async fn suggest_tags(&self, prefix: &str, size: usize) -> Result<Vec<String>, IndexError> {
        let handle = self.require()?;
        let prefix = prefix.trim().to_string();
        tokio::task::spawn_blocking(move || {
            let field = handle.fields.tags;
            let searcher = handle.reader.searcher();
            let mut candidates: Vec<String> = Vec::new();
            for segment in searcher.segment_readers() {
                let inverted = segment.inverted_index(field)?;
                let mut stream = inverted.terms().range().ge(prefix.as_bytes()).into_stream()?;
                while stream.advance() {
                    let key = stream.key();
                    if !key.starts_with(prefix.as_bytes()) {
                        break;
                    }
                    if let Ok(tag) = std::str::from_utf8(key) {
                        if !candidates.iter().any(|c| c == tag) {
                            candidates.push(tag.to_string());
                        }
                    }
                }
            }
            // Term dictionaries still hold terms of deleted documents.
            let mut counts: HashMap<String, usize> = HashMap::new();
            for tag in candidates {
                let query = TermQuery::new(Term::from_field_text(field, &tag), IndexRecordOption::Basic);
                let live = searcher.search(&query, &Count)?;
                if live > 0 {
                    counts.insert(tag, live);
                }
            }
            let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            Ok::<_, IndexError>(ranked.into_iter().take(size).map(|(tag, _)| tag).collect())
        })
        .await?
    }

    async fn refresh(&self) -> Result<(), IndexError> {
        self.require()?.reader.reload()?;
        Ok(())
    }

    async fn count(&self) -> Result<u64, IndexError> {
        Ok(self.require()?.reader.searcher().num_docs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: i64, description: &str, tags: &[&str]) -> SearchDocument {
        SearchDocument {
            id,
            original_filename: format!("{}.jpg", id),
            stored_filename: format!("stored-{}.jpg", id),
            description: Some(description.to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            storage_locator: format!("images/stored-{}.jpg", id),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, id as u32 % 60).unwrap(),
            view_count: 0,
        }
    }

    async fn ready_index() -> TantivyIndex {
        let index = TantivyIndex::in_memory("images");
        index.create_index(&IndexMapping::images()).await.unwrap();
        index
    }

    #[test]
    fn analyze_lowercases_and_splits() {
        assert_eq!(analyze("A Cat, in the PARK!"), vec!["a", "cat", "in", "the", "park"]);
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let index = ready_index().await;
        index.index_document(&doc(1, "a cat", &["cat"])).await.unwrap();
        index.index_document(&doc(1, "a dog", &["dog"])).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);

        let query = SearchQuery::new(None, vec!["dog".into()], 10).unwrap();
        let hits = index.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source["description"], "a dog");
        assert_eq!(hits[0].id, "1");
    }

    #[tokio::test]
    async fn tags_are_exact_match() {
        let index = ready_index().await;
        index.index_document(&doc(1, "x", &["Outdoor Life"])).await.unwrap();
        let partial = SearchQuery::new(None, vec!["Outdoor".into()], 10).unwrap();
        assert!(index.search(&partial).await.unwrap().is_empty());
        let exact = SearchQuery::new(None, vec!["Outdoor Life".into()], 10).unwrap();
        assert_eq!(index.search(&exact).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tag_match_outranks_fuzzy_description() {
        let index = ready_index().await;
        index.index_document(&doc(1, "sleepy cat", &["pet"])).await.unwrap();
        index.index_document(&doc(2, "a bird", &["cat"])).await.unwrap();
        let query = SearchQuery::new(Some("cat"), vec!["cat".into()], 10).unwrap();
        let hits = index.search(&query).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "2");
    }

    #[tokio::test]
    async fn delete_document_tolerates_absence() {
        let index = ready_index().await;
        index.index_document(&doc(5, "x", &[])).await.unwrap();
        index.delete_document(5).await.unwrap();
        index.delete_document(5).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);

        let absent = TantivyIndex::in_memory("nothing");
        absent.delete_document(1).await.unwrap();
    }

    #[tokio::test]
    async fn operations_on_missing_index_fail() {
        let index = TantivyIndex::in_memory("images");
        assert!(!index.index_exists().await.unwrap());
        let err = index.index_document(&doc(1, "x", &[])).await.unwrap_err();
        assert!(matches!(err, IndexError::Missing(_)));
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let index = ready_index().await;
        let err = index.create_index(&IndexMapping::images()).await.unwrap_err();
        assert!(matches!(err, IndexError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn suggestions_use_prefix_and_live_documents() {
        let index = ready_index().await;
        index.index_document(&doc(1, "x", &["cat", "catalog"])).await.unwrap();
        index.index_document(&doc(2, "y", &["cat", "dog"])).await.unwrap();
        index.index_document(&doc(3, "z", &["caterpillar"])).await.unwrap();
        index.index_document(&doc(3, "z", &["moth"])).await.unwrap();

        let tags = index.suggest_tags("cat", 10).await.unwrap();
        assert_eq!(tags, vec!["cat", "catalog"]);
        assert_eq!(index.suggest_tags("", 1).await.unwrap(), vec!["cat"]);
    }

    #[tokio::test]
    async fn oversized_search_size_is_capped() {
        let index = ready_index().await;
        index.index_document(&doc(1, "a cat", &["cat"])).await.unwrap();
        let query = SearchQuery::new(None, vec!["cat".into()], usize::MAX).unwrap();
        assert_eq!(index.search(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stored_dates_keep_microseconds() {
        let index = ready_index().await;
        let mut document = doc(4, "x", &["cat"]);
        document.created_at = Utc.timestamp_micros(1_709_296_200_123_456).unwrap();
        index.index_document(&document).await.unwrap();

        let query = SearchQuery::new(None, vec!["cat".into()], 10).unwrap();
        let hits = index.search(&query).await.unwrap();
        assert_eq!(hits[0].source["created_at"], "2024-03-01T12:30:00.123456Z");
    }

    #[tokio::test]
    async fn on_disk_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = TantivyIndex::open("images", Some(dir.path().to_path_buf())).unwrap();
            index.create_index(&IndexMapping::images()).await.unwrap();
            index.index_document(&doc(1, "a cat", &["cat"])).await.unwrap();
        }
        let index = TantivyIndex::open("images", Some(dir.path().to_path_buf())).unwrap();
        assert!(index.index_exists().await.unwrap());
        assert_eq!(index.count().await.unwrap(), 1);

        index.delete_index().await.unwrap();
        assert!(!dir.path().join("images").exists());
        index.delete_index().await.unwrap();
    }
}
