use crate::config::AppConfig;
use crate::decode;
use crate::document::{tag_suggestion_query, IndexMapping, SearchDocument, SearchQuery, TAG_SUGGESTION_AGG};
use crate::error::IndexError;
use crate::search::{SearchHit, SearchIndex};
use async_trait::async_trait;
use elasticsearch::{
    auth::Credentials,
    http::response::Response,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts, IndicesRefreshParts},
    CountParts, DeleteParts, Elasticsearch, IndexParts, SearchParts,
};
use serde_json::Value;
use url::Url;

pub struct ElasticsearchIndex {
    client: Elasticsearch,
    index: String,
}

impl ElasticsearchIndex {
    pub fn new(config: &AppConfig) -> Result<Self, IndexError> {
        let credentials = match (&config.elasticsearch_username, &config.elasticsearch_password) {
            (Some(user), Some(password)) => Some(Credentials::Basic(user.clone(), password.clone())),
            _ => None,
        };
        Self::connect(&config.elasticsearch_url, credentials, config.index_name())
    }

    pub fn connect(
        url: &str,
        credentials: Option<Credentials>,
        index: impl Into<String>,
    ) -> Result<Self, IndexError> {
        log::debug!("Creating Elasticsearch client for URL: {}", url);
        let url = Url::parse(url)?;
        let conn_pool = SingleNodeConnectionPool::new(url);
        let mut builder = TransportBuilder::new(conn_pool).disable_proxy();
        if let Some(credentials) = credentials {
            builder = builder.auth(credentials);
        }
        let client = Elasticsearch::new(builder.build()?);
        log::trace!("Elasticsearch client created successfully.");
        Ok(Self {
            client,
            index: index.into(),
        })
    }

    async fn expect_success(&self, response: Response) -> Result<Response, IndexError> {
        let status = response.status_code();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(IndexError::Rejected {
            index: self.index.clone(),
            status: status.as_u16(),
            body,
        })
    }

    /// Like `expect_success`, but a 404 is an acceptable outcome.
    async fn expect_success_or_missing(&self, response: Response) -> Result<bool, IndexError> {
        if response.status_code().as_u16() == 404 {
            return Ok(false);
        }
        self.expect_success(response).await.map(|_| true)
    }
}

/// Extract `hits.hits` from a search response body.
pub fn parse_hits(body: &Value) -> Result<Vec<SearchHit>, IndexError> {
    let hits = body["hits"]["hits"]
        .as_array()
        .ok_or_else(|| IndexError::Malformed("search response has no hits array".into()))?;
    Ok(hits
        .iter()
        .map(|hit| SearchHit {
            id: decode::as_string(&hit["_id"]).unwrap_or_default(),
            score: hit["_score"].as_f64(),
            source: hit["_source"].clone(),
        })
        .collect())
}

/// Extract bucket keys of the tag suggestion aggregation.
pub fn parse_tag_buckets(body: &Value) -> Result<Vec<String>, IndexError> {
    let buckets = body["aggregations"][TAG_SUGGESTION_AGG]["buckets"]
        .as_array()
        .ok_or_else(|| IndexError::Malformed("aggregation response has no buckets".into()))?;
    Ok(buckets
        .iter()
        .filter_map(|bucket| decode::as_string(&bucket["key"]))
        .collect())
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    fn index_name(&self) -> &str {
        &self.index
    }

    async fn index_exists(&self) -> Result<bool, IndexError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[self.index.as_str()]))
            .send()
            .await?;
        self.expect_success_or_missing(response).await
    }

    async fn create_index(&self, mapping: &IndexMapping) -> Result<(), IndexError> {
        log::debug!("Creating Elasticsearch index '{}' with explicit mapping.", self.index);
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&self.index))
            .body(mapping.to_elasticsearch())
            .send()
            .await?;
        self.expect_success(response).await?;
        Ok(())
    }

    async fn delete_index(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[self.index.as_str()]))
            .send()
            .await?;
        if self.expect_success_or_missing(response).await? {
            log::info!("Deleted Elasticsearch index '{}'.", self.index);
        } else {
            log::debug!("Elasticsearch index '{}' was already absent.", self.index);
        }
        Ok(())
    }

    async fn index_document(&self, document: &SearchDocument) -> Result<(), IndexError> {
        let doc_id = document.document_id();
        log::debug!("Indexing document {} into '{}'", doc_id, self.index);
        let response = self
            .client
            .index(IndexParts::IndexId(&self.index, &doc_id))
            .body(document)
            .send()
            .await?;
        self.expect_success(response).await?;
        log::trace!("Document {} indexed.", doc_id);
        Ok(())
    }

    async fn delete_document(&self, id: i64) -> Result<(), IndexError> {
        let doc_id = id.to_string();
        let response = self
            .client
            .delete(DeleteParts::IndexId(&self.index, &doc_id))
            .send()
            .await?;
        if !self.expect_success_or_missing(response).await? {
            log::debug!("Document {} was not in '{}'", doc_id, self.index);
        }
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, IndexError> {
        let body = query.to_elasticsearch();
        log::debug!("Searching Elasticsearch index '{}' with query: {}", self.index, body);
        let response = self
            .client
            .search(SearchParts::Index(&[self.index.as_str()]))
            .body(body)
            .send()
            .await?;
        let body = self.expect_success(response).await?.json::<Value>().await?;
        log::trace!("Elasticsearch search response: {:?}", body);
        let hits = parse_hits(&body)?;
        log::debug!("Found {} hits in Elasticsearch.", hits.len());
        Ok(hits)
    }

    async fn suggest_tags(&self, prefix: &str, size: usize) -> Result<Vec<String>, IndexError> {
        let response = self
            .client
            .search(SearchParts::Index(&[self.index.as_str()]))
            .body(tag_suggestion_query(prefix, size))
            .send()
            .await?;
        let body = self.expect_success(response).await?.json::<Value>().await?;
        parse_tag_buckets(&body)
    }

    async fn refresh(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[self.index.as_str()]))
            .send()
            .await?;
        self.expect_success(response).await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let response = self
            .client
            .count(CountParts::Index(&[self.index.as_str()]))
            .send()
            .await?;
        let body = self.expect_success(response).await?.json::<Value>().await?;
        decode::as_i64(&body["count"])
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| IndexError::Malformed(format!("count response: {}", body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hits_keep_order_and_scores() {
        let body = json!({
            "hits": {
                "total": { "value": 2 },
                "hits": [
                    { "_id": "3", "_score": 2.4, "_source": { "id": 3 } },
                    { "_id": "1", "_score": 0.7, "_source": { "id": 1.0 } }
                ]
            }
        });
        let hits = parse_hits(&body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "3");
        assert_eq!(hits[0].score, Some(2.4));
        assert_eq!(hits[1].source, json!({ "id": 1.0 }));
    }

    #[test]
    fn missing_hits_array_is_malformed() {
        let err = parse_hits(&json!({ "took": 3 })).unwrap_err();
        assert!(matches!(err, IndexError::Malformed(_)));
    }

    #[test]
    fn tag_buckets_yield_keys() {
        let body = json!({
            "aggregations": {
                "tag_suggestions": {
                    "buckets": [
                        { "key": "cat", "doc_count": 4 },
                        { "key": "catalog", "doc_count": 1 }
                    ]
                }
            }
        });
        assert_eq!(parse_tag_buckets(&body).unwrap(), vec!["cat", "catalog"]);
    }
}
