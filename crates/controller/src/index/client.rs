//! HTTP client for the search-backend indexing store (OpenSearch/
//! Elasticsearch-compatible REST API). No official client crate in the
//! dependency stack, so requests are built as plain JSON over `reqwest`
//! the same way the host clients in API mode talk to the Docker daemon.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::ids;
use super::similar::build_similar_query;
use crate::config::IndexingConfig;
use crate::error::IndexError;
use crate::model::{ContainerStats, HostMetrics, LogEntry};

pub struct IndexClient {
    http: reqwest::Client,
    base_url: String,
    auth: Option<(String, String)>,
    pub logs_index: String,
    pub metrics_index: String,
    pub host_metrics_index: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardSummary {
    pub errors_24h: u64,
    pub warnings_24h: u64,
    pub http_4xx_24h: u64,
    pub http_5xx_24h: u64,
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    pub avg_gpu_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSeriesByHost {
    pub host: String,
    pub points: Vec<TimeSeriesPoint>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatestStat {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_usage_mb: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogSearchQuery {
    pub query: Option<String>,
    pub hosts: Vec<String>,
    pub containers: Vec<String>,
    pub projects: Vec<String>,
    pub levels: Vec<String>,
    pub http_status_min: Option<u16>,
    pub http_status_max: Option<u16>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub from: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogSearchResult {
    pub total: u64,
    pub entries: Vec<LogEntry>,
    pub levels: Vec<(String, u64)>,
    pub hosts: Vec<(String, u64)>,
    pub containers: Vec<(String, u64)>,
}

impl IndexClient {
    pub fn new(config: &IndexingConfig) -> Self {
        let auth = match (&config.username, &config.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        };
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth,
            logs_index: format!("{}-logs", config.index_prefix),
            metrics_index: format!("{}-metrics", config.index_prefix),
            host_metrics_index: format!("{}-host-metrics", config.index_prefix),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some((user, pass)) = &self.auth {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    /// Blocks startup until the store answers, per the fatal-startup-retry
    /// policy (bounded attempts, fixed backoff).
    pub async fn wait_until_ready(&self, max_attempts: u32, delay: std::time::Duration) -> Result<(), IndexError> {
        for attempt in 1..=max_attempts {
            match self.request(reqwest::Method::GET, "/").send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => debug!(attempt, status = %resp.status(), "indexing store not ready yet"),
                Err(e) => debug!(attempt, error = %e, "indexing store unreachable"),
            }
            tokio::time::sleep(delay).await;
        }
        Err(IndexError::Connection(format!("indexing store unreachable after {} attempts", max_attempts)))
    }

    pub async fn initialize(&self) -> Result<(), IndexError> {
        self.ensure_index(&self.logs_index, logs_mapping()).await?;
        self.ensure_index(&self.metrics_index, metrics_mapping()).await?;
        self.ensure_index(&self.host_metrics_index, host_metrics_mapping()).await?;
        Ok(())
    }

    async fn ensure_index(&self, name: &str, mapping: Value) -> Result<(), IndexError> {
        let exists = self.request(reqwest::Method::HEAD, &format!("/{}", name)).send().await.map(|r| r.status().is_success()).unwrap_or(false);
        if exists {
            return Ok(());
        }
        let resp = self
            .request(reqwest::Method::PUT, &format!("/{}", name))
            .json(&mapping)
            .send()
            .await
            .map_err(|e| IndexError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::BackendRejected(body));
        }
        Ok(())
    }

    /// Bulk-indexes log entries with `raise_on_error=false` semantics:
    /// individual document failures are logged, not propagated.
    pub async fn index_logs(&self, entries: &[LogEntry]) -> Result<usize, IndexError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut body = String::new();
        for entry in entries {
            let id = ids::log_id(entry);
            body.push_str(&json!({"index": {"_index": self.logs_index, "_id": id}}).to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(entry).map_err(IndexError::Serialization)?);
            body.push('\n');
        }

        let resp = self
            .request(reqwest::Method::POST, "/_bulk")
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| IndexError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(IndexError::BackendRejected(resp.text().await.unwrap_or_default()));
        }

        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let failed = parsed["errors"].as_bool().unwrap_or(false);
        if failed {
            let failed_count = parsed["items"].as_array().map(|items| items.iter().filter(|i| i["index"]["error"].is_object()).count()).unwrap_or(0);
            warn!(failed = failed_count, "some logs failed to index");
        }
        Ok(entries.len())
    }

    pub async fn index_container_stats(&self, stats: &ContainerStats) -> Result<(), IndexError> {
        let id = ids::container_stats_id(&stats.host, &stats.container_id, &stats.timestamp);
        self.upsert(&self.metrics_index, &id, stats).await
    }

    pub async fn index_host_metrics(&self, metrics: &HostMetrics) -> Result<(), IndexError> {
        let id = ids::host_metrics_id(&metrics.host, &metrics.timestamp);
        self.upsert(&self.host_metrics_index, &id, metrics).await
    }

    async fn upsert<T: Serialize>(&self, index: &str, id: &str, doc: &T) -> Result<(), IndexError> {
        let resp = self
            .request(reqwest::Method::PUT, &format!("/{}/_doc/{}", index, id))
            .json(doc)
            .send()
            .await
            .map_err(|e| IndexError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(IndexError::BackendRejected(resp.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn search(&self, index: &str, body: Value) -> Result<Value, IndexError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/{}/_search", index))
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(IndexError::BackendRejected(resp.text().await.unwrap_or_default()));
        }
        resp.json().await.map_err(|e| IndexError::Connection(e.to_string()))
    }

    /// The container-list-enabling join: latest stats per container over
    /// the last 5 minutes, one aggregation query instead of N+1.
    pub async fn latest_container_stats(&self) -> Result<HashMap<String, LatestStat>, IndexError> {
        let body = json!({
            "size": 0,
            "query": {"range": {"timestamp": {"gte": "now-5m"}}},
            "aggs": {
                "by_container": {
                    "terms": {"field": "container_id", "size": 1000},
                    "aggs": {"latest": {"top_hits": {"size": 1, "sort": [{"timestamp": "desc"}]}}}
                }
            }
        });
        let response = self.search(&self.metrics_index, body).await?;
        let mut result = HashMap::new();
        let buckets = response["aggregations"]["by_container"]["buckets"].as_array().cloned().unwrap_or_default();
        for bucket in buckets {
            let container_id = bucket["key"].as_str().unwrap_or_default().to_string();
            if let Some(hit) = bucket["latest"]["hits"]["hits"][0]["_source"].as_object() {
                result.insert(
                    container_id,
                    LatestStat {
                        cpu_percent: hit.get("cpu_percent").and_then(Value::as_f64).unwrap_or(0.0),
                        memory_percent: hit.get("memory_percent").and_then(Value::as_f64).unwrap_or(0.0),
                        memory_usage_mb: hit.get("memory_usage_mb").and_then(Value::as_f64).unwrap_or(0.0),
                    },
                );
            }
        }
        Ok(result)
    }

    pub async fn dashboard_summary(&self) -> Result<DashboardSummary, IndexError> {
        let logs_body = json!({
            "size": 0,
            "query": {"range": {"timestamp": {"gte": "now-24h"}}},
            "aggs": {
                "errors": {"filter": {"terms": {"level": ["ERROR", "FATAL", "CRITICAL"]}}},
                "warnings": {"filter": {"term": {"level": "WARN"}}},
                "http_4xx": {"filter": {"range": {"http_status": {"gte": 400, "lt": 500}}}},
                "http_5xx": {"filter": {"range": {"http_status": {"gte": 500, "lt": 600}}}},
            }
        });
        let logs_response = self.search(&self.logs_index, logs_body).await.unwrap_or(Value::Null);
        let doc_count = |key: &str| logs_response["aggregations"][key]["doc_count"].as_u64().unwrap_or(0);

        let metrics_body = json!({
            "size": 0,
            "query": {"range": {"timestamp": {"gte": "now-1h"}}},
            "aggs": {
                "avg_cpu": {"avg": {"field": "cpu_percent"}},
                "avg_memory": {"avg": {"field": "memory_percent"}},
                "avg_gpu": {"avg": {"field": "gpu.utilization_percent"}},
            }
        });
        let metrics_response = self.search(&self.host_metrics_index, metrics_body).await.unwrap_or(Value::Null);
        let avg = |key: &str| metrics_response["aggregations"][key]["value"].as_f64();

        Ok(DashboardSummary {
            errors_24h: doc_count("errors"),
            warnings_24h: doc_count("warnings"),
            http_4xx_24h: doc_count("http_4xx"),
            http_5xx_24h: doc_count("http_5xx"),
            avg_cpu_percent: avg("avg_cpu").unwrap_or(0.0),
            avg_memory_percent: avg("avg_memory").unwrap_or(0.0),
            avg_gpu_percent: avg("avg_gpu"),
        })
    }

    pub async fn resource_time_series(&self, metric: &str, hours: u32, interval: &str) -> Result<Vec<TimeSeriesPoint>, IndexError> {
        let body = json!({
            "size": 0,
            "query": {"range": {"timestamp": {"gte": format!("now-{}h", hours)}}},
            "aggs": {
                "over_time": {
                    "date_histogram": {"field": "timestamp", "fixed_interval": interval},
                    "aggs": {"avg_value": {"avg": {"field": metric}}}
                }
            }
        });
        let response = self.search(&self.host_metrics_index, body).await?;
        Ok(parse_time_series_buckets(&response["aggregations"]["over_time"]["buckets"]))
    }

    pub async fn resource_time_series_by_host(&self, metric: &str, hours: u32, interval: &str) -> Result<Vec<TimeSeriesByHost>, IndexError> {
        let body = json!({
            "size": 0,
            "query": {"range": {"timestamp": {"gte": format!("now-{}h", hours)}}},
            "aggs": {
                "by_host": {
                    "terms": {"field": "host", "size": 50},
                    "aggs": {
                        "over_time": {
                            "date_histogram": {"field": "timestamp", "fixed_interval": interval},
                            "aggs": {"avg_value": {"avg": {"field": metric}}}
                        }
                    }
                }
            }
        });
        let response = self.search(&self.host_metrics_index, body).await?;
        let buckets = response["aggregations"]["by_host"]["buckets"].as_array().cloned().unwrap_or_default();
        Ok(buckets
            .into_iter()
            .map(|b| TimeSeriesByHost {
                host: b["key"].as_str().unwrap_or_default().to_string(),
                points: parse_time_series_buckets(&b["over_time"]["buckets"]),
            })
            .collect())
    }

    /// Strips volatile content from `message`, extracts stable keywords,
    /// and counts documents matching at least half of them. Returns 0
    /// without issuing a query when fewer than 2 keywords survive.
    pub async fn count_similar_logs(&self, message: &str, container_name: Option<&str>, hours: u32) -> Result<u64, IndexError> {
        let Some(similar) = build_similar_query(message) else { return Ok(0) };

        let mut filter = vec![json!({"range": {"timestamp": {"gte": format!("now-{}h", hours)}}})];
        if let Some(name) = container_name {
            filter.push(json!({"term": {"container_name": name}}));
        }

        let body = json!({
            "query": {
                "bool": {
                    "must": [{
                        "match": {
                            "message": {
                                "query": similar.keywords.join(" "),
                                "operator": "or",
                                "minimum_should_match": similar.minimum_should_match.to_string(),
                            }
                        }
                    }],
                    "filter": filter,
                }
            }
        });

        let resp = self
            .request(reqwest::Method::POST, &format!("/{}/_count", self.logs_index))
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Ok(0);
        }
        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        Ok(parsed["count"].as_u64().unwrap_or(0))
    }

    pub async fn metadata_terms(&self, field: &str, size: u32) -> Result<Vec<(String, u64)>, IndexError> {
        let body = json!({
            "size": 0,
            "aggs": {"values": {"terms": {"field": field, "size": size}}}
        });
        let response = self.search(&self.logs_index, body).await?;
        Ok(parse_terms_buckets(&response["aggregations"]["values"]["buckets"]))
    }

    pub async fn search_logs(&self, query: &LogSearchQuery) -> Result<LogSearchResult, IndexError> {
        let mut must = Vec::new();
        let mut filter = Vec::new();

        if let Some(q) = &query.query {
            must.push(json!({"query_string": {"query": q, "fields": ["message"]}}));
        }
        if !query.hosts.is_empty() {
            filter.push(json!({"terms": {"host": query.hosts}}));
        }
        if !query.containers.is_empty() {
            filter.push(json!({"terms": {"container_name": query.containers}}));
        }
        if !query.projects.is_empty() {
            filter.push(json!({"terms": {"stack_project": query.projects}}));
        }
        if !query.levels.is_empty() {
            filter.push(json!({"terms": {"level": query.levels}}));
        }
        if query.http_status_min.is_some() || query.http_status_max.is_some() {
            let mut range = serde_json::Map::new();
            if let Some(min) = query.http_status_min {
                range.insert("gte".to_string(), json!(min));
            }
            if let Some(max) = query.http_status_max {
                range.insert("lte".to_string(), json!(max));
            }
            filter.push(json!({"range": {"http_status": range}}));
        }
        if query.since.is_some() || query.until.is_some() {
            let mut range = serde_json::Map::new();
            if let Some(since) = query.since {
                range.insert("gte".to_string(), json!(since.to_rfc3339()));
            }
            if let Some(until) = query.until {
                range.insert("lte".to_string(), json!(until.to_rfc3339()));
            }
            filter.push(json!({"range": {"timestamp": range}}));
        }

        let size = query.size.min(10_000);
        let body = json!({
            "from": query.from,
            "size": size,
            "sort": [{"timestamp": "desc"}],
            "query": {"bool": {"must": must, "filter": filter}},
            "aggs": {
                "levels": {"terms": {"field": "level", "size": 20}},
                "hosts": {"terms": {"field": "host", "size": 50}},
                "containers": {"terms": {"field": "container_name", "size": 100}},
            }
        });

        let response = self.search(&self.logs_index, body).await?;
        let hits = response["hits"]["hits"].as_array().cloned().unwrap_or_default();
        let entries = hits
            .into_iter()
            .filter_map(|h| serde_json::from_value::<LogEntry>(h["_source"].clone()).ok())
            .collect();

        Ok(LogSearchResult {
            total: response["hits"]["total"]["value"].as_u64().unwrap_or(0),
            entries,
            levels: parse_terms_buckets(&response["aggregations"]["levels"]["buckets"]),
            hosts: parse_terms_buckets(&response["aggregations"]["hosts"]["buckets"]),
            containers: parse_terms_buckets(&response["aggregations"]["containers"]["buckets"]),
        })
    }

    /// Deletes documents older than `retention_days` from every index.
    /// Run once per hour by the collector's retention loop.
    pub async fn retention_sweep(&self, retention_days: u32) -> Result<(), IndexError> {
        let cutoff = format!("now-{}d", retention_days);
        for index in [&self.logs_index, &self.metrics_index, &self.host_metrics_index] {
            let body = json!({"query": {"range": {"timestamp": {"lt": cutoff}}}});
            let resp = self
                .request(reqwest::Method::POST, &format!("/{}/_delete_by_query", index))
                .json(&body)
                .send()
                .await
                .map_err(|e| IndexError::Connection(e.to_string()))?;
            if !resp.status().is_success() {
                warn!(index = %index, status = %resp.status(), "retention sweep failed for index");
            }
        }
        Ok(())
    }
}

fn parse_time_series_buckets(buckets: &Value) -> Vec<TimeSeriesPoint> {
    buckets
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|b| {
            let ts = b["key_as_string"].as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok())?.with_timezone(&Utc);
            let value = b["avg_value"]["value"].as_f64().unwrap_or(0.0);
            Some(TimeSeriesPoint { timestamp: ts, value })
        })
        .collect()
}

fn parse_terms_buckets(buckets: &Value) -> Vec<(String, u64)> {
    buckets
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|b| Some((b["key"].as_str()?.to_string(), b["doc_count"].as_u64().unwrap_or(0))))
        .collect()
}

fn logs_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "timestamp": {"type": "date"},
                "host": {"type": "keyword"},
                "container_id": {"type": "keyword"},
                "container_name": {"type": "keyword"},
                "stack_project": {"type": "keyword"},
                "stack_service": {"type": "keyword"},
                "stream": {"type": "keyword"},
                "message": {"type": "text", "analyzer": "standard"},
                "level": {"type": "keyword"},
                "http_status": {"type": "integer"},
                "parsed_fields": {"type": "object", "enabled": false},
            }
        },
        "settings": {"number_of_shards": 1, "number_of_replicas": 0, "index.refresh_interval": "5s"}
    })
}

fn metrics_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "timestamp": {"type": "date"},
                "host": {"type": "keyword"},
                "container_id": {"type": "keyword"},
                "container_name": {"type": "keyword"},
                "cpu_percent": {"type": "float"},
                "memory_usage_mb": {"type": "float"},
                "memory_limit_mb": {"type": "float"},
                "memory_percent": {"type": "float"},
                "network_rx_bytes": {"type": "long"},
                "network_tx_bytes": {"type": "long"},
                "block_read_bytes": {"type": "long"},
                "block_write_bytes": {"type": "long"},
            }
        },
        "settings": {"number_of_shards": 1, "number_of_replicas": 0}
    })
}

fn host_metrics_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "timestamp": {"type": "date"},
                "host": {"type": "keyword"},
                "cpu_percent": {"type": "float"},
                "memory_total_mb": {"type": "float"},
                "memory_used_mb": {"type": "float"},
                "memory_percent": {"type": "float"},
                "disk_total_mb": {"type": "float"},
                "disk_used_mb": {"type": "float"},
                "disk_percent": {"type": "float"},
                "gpu": {"type": "object"},
            }
        },
        "settings": {"number_of_shards": 1, "number_of_replicas": 0}
    })
}
