//! Search engine client
//!
//! [`SearchClient`] is the surface the orchestrator and the snapshot
//! collector consume; [`ElasticsearchClient`] implements it over the
//! Elasticsearch REST API with `reqwest`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use crate::clients::error::{ClientError, check_status};

/// Index pattern holding the platform logs of a cloud deployment
pub const CLOUD_LOGS_INDEX: &str = "elastic-cloud-logs-*";

/// Page size of the composite aggregation used for document counts
const COMPOSITE_PAGE_SIZE: usize = 500;

/// How long a point-in-time stays open between pages
const PIT_KEEP_ALIVE: &str = "1m";

/// Maximum number of log entries returned by one log query
const MAX_LOG_ENTRIES: usize = 100;

/// How requests authenticate
#[derive(Clone)]
pub enum Auth {
    Basic { username: String, password: String },
    /// Base64 encoded `id:key`
    ApiKey(String),
}

/// One backing index as reported by the data stream API
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackingIndex {
    pub index_name: String,
    /// Display name of the manager of this index
    #[serde(default)]
    pub managed_by: Option<String>,
}

/// Data stream metadata as reported by the data stream API
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataStreamInfo {
    pub name: String,
    #[serde(default)]
    pub indices: Vec<BackingIndex>,
    #[serde(default)]
    pub prefer_ilm: bool,
    /// Display name of the manager of the next generation
    #[serde(default)]
    pub next_generation_managed_by: Option<String>,
}

impl DataStreamInfo {
    pub fn backing_index_count(&self) -> usize {
        self.indices.len()
    }
}

#[derive(Deserialize)]
struct DataStreamsResponse {
    #[serde(default)]
    data_streams: Vec<DataStreamInfo>,
}

/// A query clause; log entries matching any ignored clause are dropped
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogFilter(pub Value);

impl LogFilter {
    pub fn match_phrase(field: &str, value: &str) -> Self {
        Self(json!({ "match_phrase": { field: value } }))
    }

    pub fn term(field: &str, value: &str) -> Self {
        Self(json!({ "term": { field: value } }))
    }
}

/// Error-level log query for one service type
#[derive(Clone, Debug, PartialEq)]
pub struct LogQuery {
    /// `service.type` of the emitting component (`elasticsearch`, `apm`)
    pub service_type: String,
    pub ignored: Vec<LogFilter>,
}

impl LogQuery {
    pub fn new(service_type: impl Into<String>, ignored: &[LogFilter]) -> Self {
        Self {
            service_type: service_type.into(),
            ignored: ignored.to_vec(),
        }
    }

    /// Request body for the log search
    pub fn to_body(&self) -> Value {
        json!({
            "size": MAX_LOG_ENTRIES,
            "sort": [{ "@timestamp": { "order": "asc" } }],
            "query": {
                "bool": {
                    "filter": [
                        { "term": { "service.type": self.service_type } },
                        { "term": { "log.level": "error" } },
                    ],
                    "must_not": self.ignored,
                }
            }
        })
    }
}

/// A single error log entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "@timestamp", default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Full `_source` of the hit
    #[serde(skip)]
    pub source: Value,
}

impl LogEntry {
    fn from_source(source: Value) -> Self {
        let mut entry: LogEntry = serde_json::from_value(source.clone()).unwrap_or(LogEntry {
            timestamp: None,
            message: None,
            source: Value::Null,
        });
        entry.source = source;
        entry
    }
}

/// Error logs returned by a log query
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogEntries {
    /// Total number of matching entries, possibly more than `entries.len()`
    pub total: u64,
    pub entries: Vec<LogEntry>,
}

/// Search engine operations used by the harness and by test hooks
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Create an API key; `None` expiration means it never expires.
    /// Returns the encoded key usable in an `ApiKey` authorization header.
    async fn create_api_key(
        &self,
        name: &str,
        expiration: Option<Duration>,
        role_descriptors: Value,
    ) -> Result<String, ClientError>;

    /// Data streams matching `pattern`; no match yields an empty list
    async fn get_data_streams(&self, pattern: &str) -> Result<Vec<DataStreamInfo>, ClientError>;

    /// Document count per data stream matching `pattern`, read from a
    /// single point-in-time with every page aggregated
    async fn doc_count_per_stream(&self, pattern: &str)
    -> Result<BTreeMap<String, u64>, ClientError>;

    /// Error-level log entries for one service, minus the ignored ones
    async fn search_error_logs(&self, query: &LogQuery) -> Result<LogEntries, ClientError>;

    /// Arbitrary JSON request, for setup and post-upgrade hooks
    async fn perform(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError>;
}

/// [`SearchClient`] over the Elasticsearch REST API
#[derive(Clone)]
pub struct ElasticsearchClient {
    base: Url,
    auth: Auth,
    http: reqwest::Client,
}

impl ElasticsearchClient {
    pub fn new(
        base: Url,
        auth: Auth,
        tls_skip_verify: bool,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(tls_skip_verify)
            .timeout(timeout)
            .build()?;
        Ok(Self { base, auth, http })
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, ClientError> {
        let url = self.base.join(path.trim_start_matches('/'))?;
        let builder = self.http.request(method, url);
        Ok(match &self.auth {
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::ApiKey(key) => builder.header(reqwest::header::AUTHORIZATION, format!("ApiKey {key}")),
        })
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, ClientError> {
        let response = check_status(builder.send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn open_pit(&self, pattern: &str) -> Result<Option<String>, ClientError> {
        let builder = self
            .request(Method::POST, &format!("{pattern}/_pit"))?
            .query(&[("keep_alive", PIT_KEEP_ALIVE), ("expand_wildcards", "all")]);
        match self.send(builder).await {
            Ok(body) => body
                .get("id")
                .and_then(Value::as_str)
                .map(|id| Some(id.to_string()))
                .ok_or_else(|| ClientError::Decode("point-in-time response without id".into())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn close_pit(&self, id: &str) -> Result<(), ClientError> {
        let builder = self.request(Method::DELETE, "_pit")?.json(&json!({ "id": id }));
        self.send(builder).await.map(|_| ())
    }

    async fn count_pages(
        &self,
        pit_id: &mut String,
    ) -> Result<BTreeMap<String, u64>, ClientError> {
        let mut counts = BTreeMap::new();
        let mut after: Option<Value> = None;

        loop {
            let body = composite_count_body(pit_id, after.as_ref());
            let response = self.send(self.request(Method::POST, "_search")?.json(&body)).await?;

            if let Some(id) = response.get("pit_id").and_then(Value::as_str) {
                *pit_id = id.to_string();
            }

            let page: CompositePage = response
                .pointer("/aggregations/streams")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| ClientError::Decode(e.to_string()))?
                .unwrap_or_default();

            if page.buckets.is_empty() {
                break;
            }
            for bucket in &page.buckets {
                *counts.entry(bucket.key.stream_name()).or_insert(0) += bucket.doc_count;
            }
            debug!(buckets = page.buckets.len(), "aggregated document count page");

            match page.after_key {
                Some(key) => after = Some(key),
                None => break,
            }
        }
        Ok(counts)
    }
}

#[derive(Deserialize, Default)]
struct CompositePage {
    #[serde(default)]
    buckets: Vec<CompositeBucket>,
    #[serde(default)]
    after_key: Option<Value>,
}

#[derive(Deserialize)]
struct CompositeBucket {
    key: StreamKey,
    doc_count: u64,
}

#[derive(Deserialize)]
struct StreamKey {
    #[serde(rename = "type")]
    kind: String,
    dataset: String,
    namespace: String,
}

impl StreamKey {
    fn stream_name(&self) -> String {
        format!("{}-{}-{}", self.kind, self.dataset, self.namespace)
    }
}

fn composite_count_body(pit_id: &str, after: Option<&Value>) -> Value {
    let mut composite = json!({
        "size": COMPOSITE_PAGE_SIZE,
        "sources": [
            { "type": { "terms": { "field": "data_stream.type" } } },
            { "dataset": { "terms": { "field": "data_stream.dataset" } } },
            { "namespace": { "terms": { "field": "data_stream.namespace" } } },
        ]
    });
    if let (Some(after), Some(obj)) = (after, composite.as_object_mut()) {
        obj.insert("after".to_string(), after.clone());
    }
    json!({
        "size": 0,
        "track_total_hits": false,
        "pit": { "id": pit_id, "keep_alive": PIT_KEEP_ALIVE },
        "aggs": { "streams": { "composite": composite } }
    })
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    #[instrument(skip(self, role_descriptors))]
    async fn create_api_key(
        &self,
        name: &str,
        expiration: Option<Duration>,
        role_descriptors: Value,
    ) -> Result<String, ClientError> {
        let mut body = json!({ "name": name, "role_descriptors": role_descriptors });
        if let (Some(ttl), Some(obj)) = (expiration, body.as_object_mut()) {
            obj.insert("expiration".to_string(), json!(format!("{}s", ttl.as_secs())));
        }
        let response = self
            .send(self.request(Method::POST, "_security/api_key")?.json(&body))
            .await?;
        response
            .get("encoded")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Decode("api key response without encoded key".into()))
    }

    #[instrument(skip(self))]
    async fn get_data_streams(&self, pattern: &str) -> Result<Vec<DataStreamInfo>, ClientError> {
        let builder = self.request(Method::GET, &format!("_data_stream/{pattern}"))?;
        match self.send(builder).await {
            Ok(body) => {
                let parsed: DataStreamsResponse =
                    serde_json::from_value(body).map_err(|e| ClientError::Decode(e.to_string()))?;
                Ok(parsed.data_streams)
            }
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn doc_count_per_stream(
        &self,
        pattern: &str,
    ) -> Result<BTreeMap<String, u64>, ClientError> {
        let Some(mut pit_id) = self.open_pit(pattern).await? else {
            return Ok(BTreeMap::new());
        };

        let counts = self.count_pages(&mut pit_id).await;
        if let Err(e) = self.close_pit(&pit_id).await {
            debug!(error = %e, "failed to close point-in-time");
        }
        counts
    }

    #[instrument(skip(self, query), fields(service_type = %query.service_type))]
    async fn search_error_logs(&self, query: &LogQuery) -> Result<LogEntries, ClientError> {
        let builder = self
            .request(Method::POST, &format!("{CLOUD_LOGS_INDEX}/_search"))?
            .query(&[("ignore_unavailable", "true"), ("allow_no_indices", "true")])
            .json(&query.to_body());
        let response = self.send(builder).await?;

        let total = response
            .pointer("/hits/total/value")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let entries = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|h| h.get("_source").cloned())
                    .map(LogEntry::from_source)
                    .collect()
            })
            .unwrap_or_default();

        Ok(LogEntries { total, entries })
    }

    async fn perform(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let mut builder = self.request(method, path)?;
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        self.send(builder).await
    }
}
