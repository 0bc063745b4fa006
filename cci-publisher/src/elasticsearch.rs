#![doc = "Elasticsearch-backed collaborators: file registry, aggregation state store and collections search."]
//
//! # Elasticsearch integration (CLI <-> Core)
//!
//! The core pipeline only knows the [`FileRegistry`], [`StateBackend`] and
//! [`CollectionsIndex`] traits. This module wires them to the three indices
//! the publisher talks to:
//!
//! - [`FilesIndex`]: per-file records (`projects.opensearch.drsId`, `info.format`,
//!   `info.directory`, `info.name`, `info.size`). Counting goes through `_count`;
//!   listing pages through the scroll API.
//! - [`StateIndex`]: one `{id, file_count, aggregate, wms}` document per dataset,
//!   created on first write if the index is missing. 404 is reported as
//!   [`StateStoreError::NotFound`].
//! - [`CollectionsSearch`]: the `drsid` composite aggregation over published
//!   collections, one page per call.
//!
//! Query bodies and response parsing are plain functions so they can be tested
//! without a server.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cci_publisher_core::contract::{
    AggregationState, CollectionsIndex, CompositeBucket, CompositePage, FileRecord, FileRegistry,
    StateBackend,
};
use cci_publisher_core::error::{RegistryError, StateStoreError};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// How long a scroll context stays alive between pages.
const SCROLL_KEEP_ALIVE: &str = "5m";

/// Thin HTTP wrapper shared by all index clients.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

/// A completed request: status plus raw body.
struct Reply {
    status: StatusCode,
    body: String,
}

impl Reply {
    fn json(&self) -> Result<Value, String> {
        serde_json::from_str(&self.body).map_err(|e| e.to_string())
    }
}

impl ElasticsearchClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(url = %base_url, api_key_set = api_key.is_some(), "Initialised Elasticsearch client");
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key.as_str()),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Reply, reqwest::Error> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(Reply { status, body })
    }

    /// POST a JSON body and return the parsed JSON of a successful reply.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, RegistryError> {
        let reply = self
            .send(self.request(Method::POST, path).json(body))
            .await
            .map_err(|e| RegistryError::Request(e.to_string()))?;
        if !reply.status.is_success() {
            return Err(RegistryError::Status {
                status: reply.status.as_u16(),
                body: reply.body,
            });
        }
        reply.json().map_err(RegistryError::Malformed)
    }
}

/// Query selecting the files of one dataset with one format.
pub fn files_query(drs_id: &str, format: &str) -> Value {
    json!({
        "bool": {
            "must": [
                {"term": {"projects.opensearch.drsId.keyword": drs_id}},
                {"term": {"info.format.keyword": format}}
            ]
        }
    })
}

/// Scroll id and file records of one search/scroll reply.
pub fn parse_file_hits(reply: &Value) -> Result<(Option<String>, Vec<FileRecord>), RegistryError> {
    let scroll_id = reply
        .get("_scroll_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let hits = reply
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| RegistryError::Malformed("search reply has no hits.hits".to_string()))?;

    let mut files = Vec::with_capacity(hits.len());
    for hit in hits {
        let info = hit
            .pointer("/_source/info")
            .ok_or_else(|| RegistryError::Malformed("hit has no _source.info".to_string()))?;
        let text = |field: &str| {
            info.get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RegistryError::Malformed(format!("hit has no info.{field}")))
        };
        files.push(FileRecord {
            directory: text("directory")?,
            name: text("name")?,
            size: info.get("size").and_then(Value::as_u64).unwrap_or(0),
        });
    }
    Ok((scroll_id, files))
}

pub struct FilesIndex {
    client: ElasticsearchClient,
    index: String,
    page_size: usize,
}

impl FilesIndex {
    pub fn new(client: ElasticsearchClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        let request = self
            .client
            .request(Method::DELETE, "_search/scroll")
            .json(&json!({"scroll_id": [scroll_id]}));
        match self.client.send(request).await {
            Ok(reply) if reply.status.is_success() => {}
            Ok(reply) => warn!(status = %reply.status, "Failed to clear scroll context"),
            Err(e) => warn!(error = %e, "Failed to clear scroll context"),
        }
    }
}

#[async_trait]
impl FileRegistry for FilesIndex {
    async fn count_files(&self, dataset_id: &str, format: &str) -> Result<u64, RegistryError> {
        let reply = self
            .client
            .post_json(
                &format!("{}/_count", self.index),
                &json!({"query": files_query(dataset_id, format)}),
            )
            .await?;
        reply
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| RegistryError::Malformed("count reply has no count".to_string()))
    }

    async fn list_files(
        &self,
        dataset_id: &str,
        format: &str,
    ) -> Result<Vec<FileRecord>, RegistryError> {
        let body = json!({
            "query": files_query(dataset_id, format),
            "size": self.page_size,
            "_source": ["info.directory", "info.name", "info.size"]
        });
        let reply = self
            .client
            .post_json(
                &format!("{}/_search?scroll={SCROLL_KEEP_ALIVE}", self.index),
                &body,
            )
            .await?;
        let (mut scroll_id, mut page) = parse_file_hits(&reply)?;
        let mut files = Vec::new();

        let result = loop {
            if page.is_empty() {
                break Ok(files);
            }
            files.append(&mut page);
            let Some(id) = scroll_id.clone() else {
                break Ok(files);
            };
            let next = self
                .client
                .post_json(
                    "_search/scroll",
                    &json!({"scroll": SCROLL_KEEP_ALIVE, "scroll_id": id}),
                )
                .await
                .and_then(|reply| parse_file_hits(&reply));
            match next {
                Ok((next_id, next_page)) => {
                    scroll_id = next_id.or(scroll_id);
                    page = next_page;
                }
                Err(e) => break Err(e),
            }
        };

        if let Some(id) = &scroll_id {
            self.clear_scroll(id).await;
        }
        if let Ok(files) = &result {
            debug!(dataset = %dataset_id, files = files.len(), "Listed files");
        }
        result
    }
}

/// Aggregation state documents, one per dataset, keyed by storage key.
pub struct StateIndex {
    client: ElasticsearchClient,
    index: String,
    ensured: AtomicBool,
}

impl StateIndex {
    pub fn new(client: ElasticsearchClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
            ensured: AtomicBool::new(false),
        }
    }

    fn doc_path(&self, key: &str) -> String {
        format!("{}/_doc/{key}", self.index)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Reply, StateStoreError> {
        self.client
            .send(request)
            .await
            .map_err(|e| StateStoreError::Request(e.to_string()))
    }

    /// Create the index if it does not exist yet. Checked once per process.
    pub async fn ensure_index(&self) -> Result<(), StateStoreError> {
        if self.ensured.load(Ordering::Acquire) {
            return Ok(());
        }
        let exists = self
            .send(self.client.request(Method::HEAD, &self.index))
            .await?;
        match exists.status {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                let created = self
                    .send(self.client.request(Method::PUT, &self.index))
                    .await?;
                let raced = created.body.contains("resource_already_exists_exception");
                if !created.status.is_success() && !raced {
                    return Err(StateStoreError::Status {
                        status: created.status.as_u16(),
                        body: created.body,
                    });
                }
                info!(index = %self.index, "[STATE] Created state index");
            }
            other => {
                return Err(StateStoreError::Status {
                    status: other.as_u16(),
                    body: exists.body,
                })
            }
        }
        self.ensured.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl StateBackend for StateIndex {
    async fn fetch(&self, key: &str) -> Result<AggregationState, StateStoreError> {
        let reply = self
            .send(self.client.request(Method::GET, &self.doc_path(key)))
            .await?;
        match reply.status {
            StatusCode::NOT_FOUND => Err(StateStoreError::NotFound(key.to_string())),
            s if s.is_success() => {
                let value = reply.json().map_err(StateStoreError::Malformed)?;
                let source = value
                    .get("_source")
                    .cloned()
                    .ok_or_else(|| StateStoreError::Malformed("document has no _source".to_string()))?;
                serde_json::from_value(source).map_err(|e| StateStoreError::Malformed(e.to_string()))
            }
            other => Err(StateStoreError::Status {
                status: other.as_u16(),
                body: reply.body,
            }),
        }
    }

    async fn put(&self, key: &str, state: &AggregationState) -> Result<(), StateStoreError> {
        self.ensure_index().await?;
        let reply = self
            .send(self.client.request(Method::PUT, &self.doc_path(key)).json(state))
            .await?;
        if reply.status.is_success() {
            Ok(())
        } else {
            Err(StateStoreError::Status {
                status: reply.status.as_u16(),
                body: reply.body,
            })
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        let reply = self
            .send(self.client.request(Method::DELETE, &self.doc_path(key)))
            .await?;
        match reply.status {
            StatusCode::NOT_FOUND => Err(StateStoreError::NotFound(key.to_string())),
            s if s.is_success() => Ok(()),
            other => Err(StateStoreError::Status {
                status: other.as_u16(),
                body: reply.body,
            }),
        }
    }
}

/// Composite search over published collections, grouped by `(drsId, path)`.
pub fn collections_query(after: Option<&Value>, page_size: usize) -> Value {
    let mut composite = json!({
        "size": page_size,
        "sources": [
            {"drs": {"terms": {"field": "drsId.keyword"}}},
            {"path": {"terms": {"field": "path.keyword"}}}
        ]
    });
    if let Some(after) = after {
        composite["after"] = after.clone();
    }
    json!({
        "query": {"bool": {"filter": [{"term": {"is_published": "true"}}]}},
        "size": 0,
        "aggs": {"drsid": {"composite": composite}}
    })
}

/// Buckets and resume key of one composite reply.
///
/// An empty page never carries a resume key, so paging always terminates.
pub fn parse_composite_page(reply: &Value) -> Result<CompositePage, RegistryError> {
    let aggregation = reply
        .pointer("/aggregations/drsid")
        .ok_or_else(|| RegistryError::Malformed("reply has no aggregations.drsid".to_string()))?;
    let raw_buckets = aggregation
        .get("buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| RegistryError::Malformed("composite reply has no buckets".to_string()))?;

    let mut buckets = Vec::with_capacity(raw_buckets.len());
    for bucket in raw_buckets {
        let key = |field: &str| {
            bucket
                .pointer(&format!("/key/{field}"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RegistryError::Malformed(format!("bucket has no key.{field}")))
        };
        buckets.push(CompositeBucket {
            drs_id: key("drs")?,
            path: key("path")?,
        });
    }

    let after_key = if buckets.is_empty() {
        None
    } else {
        aggregation.get("after_key").cloned()
    };
    Ok(CompositePage { buckets, after_key })
}

pub struct CollectionsSearch {
    client: ElasticsearchClient,
    index: String,
    page_size: usize,
}

impl CollectionsSearch {
    pub fn new(client: ElasticsearchClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

#[async_trait]
impl CollectionsIndex for CollectionsSearch {
    async fn published_page(&self, after: Option<Value>) -> Result<CompositePage, RegistryError> {
        let reply = self
            .client
            .post_json(
                &format!("{}/_search", self.index),
                &collections_query(after.as_ref(), self.page_size),
            )
            .await?;
        parse_composite_page(&reply)
    }
}
