//! Elasticsearch search index over the REST API.
//!
//! Documents live in one index (default `emails`) keyed by email id.
//! Keyword fields are filtered with `term` queries; free text is a fuzzy
//! `multi_match` on subject (boosted) and body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use onebox_core::config::SearchConfig;
use onebox_core::error::IndexError;
use onebox_core::types::ClassifiedEmail;
use onebox_sync::traits::{IndexField, SearchFilters, SearchIndex, SearchPage};

use super::{keyword_filters, page_offset, paging, validate_update, MAX_DISTINCT_VALUES};

// ─────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────

#[derive(Deserialize)]
struct GetResponse {
    #[serde(rename = "_source")]
    source: ClassifiedEmail,
}

#[derive(Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Hits,
    #[serde(default)]
    aggregations: Option<Aggregations>,
}

#[derive(Default, Deserialize)]
struct Hits {
    #[serde(default)]
    total: Total,
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Default, Deserialize)]
struct Total {
    value: usize,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: ClassifiedEmail,
}

#[derive(Deserialize)]
struct Aggregations {
    values: Terms,
}

#[derive(Deserialize)]
struct Terms {
    #[serde(default)]
    buckets: Vec<Bucket>,
}

#[derive(Deserialize)]
struct Bucket {
    key: String,
}

/// Index mapping for email documents.
pub fn email_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "accountId": { "type": "keyword" },
                "folder": { "type": "keyword" },
                "subject": { "type": "text" },
                "body": { "type": "text" },
                "from": { "type": "keyword" },
                "to": { "type": "keyword" },
                "cc": { "type": "keyword" },
                "bcc": { "type": "keyword" },
                "date": { "type": "date" },
                "aiCategory": { "type": "keyword" },
                "indexedAt": { "type": "date" },
                "hasAttachments": { "type": "boolean" },
                "messageId": { "type": "keyword" }
            }
        }
    })
}

/// `bool` query for a set of filters.
fn build_query(filters: &SearchFilters) -> Value {
    let must = match filters.text.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => json!({
            "multi_match": {
                "query": q,
                "fields": ["subject^2", "body"],
                "fuzziness": "AUTO"
            }
        }),
        _ => json!({ "match_all": {} }),
    };

    let filter: Vec<Value> = keyword_filters(filters)
        .into_iter()
        .map(|(field, value)| json!({ "term": { field.as_str(): value } }))
        .collect();

    json!({ "bool": { "must": must, "filter": filter } })
}

// ─────────────────────────────────────────────
// ElasticsearchIndex
// ─────────────────────────────────────────────

pub struct ElasticsearchIndex {
    client: reqwest::Client,
    base: Url,
    index: String,
}

impl std::fmt::Debug for ElasticsearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchIndex")
            .field("base", &self.base.as_str())
            .field("index", &self.index)
            .finish()
    }
}

impl ElasticsearchIndex {
    pub fn new(config: &SearchConfig) -> Result<Self, IndexError> {
        let base = Url::parse(&config.url)
            .map_err(|e| IndexError::Backend(format!("invalid Elasticsearch URL '{}': {}", config.url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            client,
            base,
            index: config.index.clone(),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    /// `<base>/<index>/<segments...>`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| IndexError::Backend(format!("'{}' cannot be a base URL", self.base)))?;
            path.pop_if_empty().push(&self.index);
            path.extend(segments);
        }
        Ok(url)
    }

    /// Create the index with the email mapping if it does not exist yet.
    pub async fn ensure_index(&self) -> Result<(), IndexError> {
        let url = self.url(&[])?;
        let exists = self.client.head(url.clone()).send().await.map_err(backend)?;
        if exists.status().is_success() {
            debug!(index = %self.index, "Elasticsearch index exists");
            return Ok(());
        }

        let response = self
            .client
            .put(url)
            .json(&email_mapping())
            .send()
            .await
            .map_err(backend)?;
        check(response).await?;
        info!(index = %self.index, "created Elasticsearch index");
        Ok(())
    }

    async fn search(&self, body: Value) -> Result<SearchResponse, IndexError> {
        let response = self
            .client
            .post(self.url(&["_search"])?)
            .json(&body)
            .send()
            .await
            .map_err(backend)?;
        check(response)
            .await?
            .json()
            .await
            .map_err(|e| IndexError::Backend(format!("invalid search response: {}", e)))
    }
}

fn backend(e: reqwest::Error) -> IndexError {
    IndexError::Backend(e.to_string())
}

/// Turn a non-2xx response into `IndexError::Backend`.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, IndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(IndexError::Backend(format!("{}: {}", status, body)))
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn upsert(&self, id: &str, record: &ClassifiedEmail) -> Result<(), IndexError> {
        let response = self
            .client
            .put(self.url(&["_doc", id])?)
            .json(record)
            .send()
            .await
            .map_err(backend)?;
        check(response).await?;
        debug!(index = %self.index, id = %id, "indexed email");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ClassifiedEmail>, IndexError> {
        let response = self
            .client
            .get(self.url(&["_doc", id])?)
            .send()
            .await
            .map_err(backend)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc: GetResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| IndexError::Backend(format!("invalid document: {}", e)))?;
        Ok(Some(doc.source))
    }

    async fn query(
        &self,
        filters: &SearchFilters,
        page: usize,
        limit: usize,
    ) -> Result<SearchPage, IndexError> {
        let (page, limit) = paging(page, limit);
        let body = json!({
            "query": build_query(filters),
            "sort": [{ "date": { "order": "desc" } }],
            "from": page_offset(page, limit),
            "size": limit,
        });

        let response = self.search(body).await?;
        Ok(SearchPage {
            total: response.hits.total.value,
            items: response.hits.hits.into_iter().map(|h| h.source).collect(),
            page,
            limit,
        })
    }

    async fn distinct_values(
        &self,
        field: IndexField,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<String>, IndexError> {
        let everything = SearchFilters::default();
        let body = json!({
            "size": 0,
            "query": build_query(filter.unwrap_or(&everything)),
            "aggs": {
                "values": {
                    "terms": { "field": field.as_str(), "size": MAX_DISTINCT_VALUES }
                }
            }
        });

        let response = self.search(body).await?;
        Ok(response
            .aggregations
            .map(|a| a.values.buckets.into_iter().map(|b| b.key).collect())
            .unwrap_or_default())
    }

    async fn update_field(&self, id: &str, field: IndexField, value: &str) -> Result<(), IndexError> {
        let value = validate_update(field, value)?;
        let response = self
            .client
            .post(self.url(&["_update", id])?)
            .json(&json!({ "doc": { field.as_str(): value } }))
            .send()
            .await
            .map_err(backend)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::NotFound(id.to_string()));
        }
        check(response).await?;
        info!(index = %self.index, id = %id, field = %field, value = %value, "updated email field");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
