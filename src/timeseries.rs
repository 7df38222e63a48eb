//! Time-series store client
//!
//! HTTP client for a Prometheus-compatible store (line import endpoint plus
//! `/api/v1/query` and `/api/v1/query_range`). Writes are batched per cycle
//! and coalesced into one POST body. Transient failures (timeouts, 429,
//! 5xx) retry up to three times with 0.5s/1s/2s backoff; client errors
//! never retry. A failing store is non-fatal to probing; workers log the
//! loss and continue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Time-series client errors
#[derive(Debug, Error)]
pub enum TimeseriesError {
    #[error("Time-series transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Time-series store rejected the request: {status} - {body}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Response body excerpt
        body: String,
    },

    #[error("Time-series response was not understood: {reason}")]
    MalformedResponse { reason: String },
}

/// One labeled sample
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric name
    pub metric: String,
    /// Label pairs, written in declaration order
    pub labels: Vec<(String, String)>,
    /// Value
    pub value: f64,
    /// Explicit timestamp; out-of-order writes within a cycle are tolerated
    /// by the store
    pub ts: DateTime<Utc>,
}

impl Sample {
    /// Builds a sample stamped at the given time
    #[must_use]
    pub fn new(metric: impl Into<String>, value: f64, ts: DateTime<Utc>) -> Self {
        Self {
            metric: metric.into(),
            labels: Vec::new(),
            value,
            ts,
        }
    }

    /// Appends a label pair
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Renders the Prometheus text-format line
    #[must_use]
    pub fn to_line(&self) -> String {
        let labels = if self.labels.is_empty() {
            String::new()
        } else {
            let inner = self
                .labels
                .iter()
                .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{inner}}}")
        };
        format!(
            "{}{} {} {}",
            self.metric,
            labels,
            self.value,
            self.ts.timestamp_millis()
        )
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// One instant-query result
#[derive(Debug, Clone)]
pub struct InstantResult {
    /// Series labels
    pub labels: HashMap<String, String>,
    /// Sample value
    pub value: f64,
}

/// One range-query series
#[derive(Debug, Clone)]
pub struct RangeSeries {
    /// Series labels
    pub labels: HashMap<String, String>,
    /// `(epoch_seconds, value)` points
    pub points: Vec<(i64, f64)>,
}

/// Chooses the query step for a requested range: 5m up to a day, 15m up to
/// a week, 1h beyond
#[must_use]
pub fn step_for_range(range: Duration) -> Duration {
    const DAY: u64 = 24 * 3600;
    if range.as_secs() <= DAY {
        Duration::from_secs(5 * 60)
    } else if range.as_secs() <= 7 * DAY {
        Duration::from_secs(15 * 60)
    } else {
        Duration::from_secs(3600)
    }
}

/// Time-series store seam used by workers, the baseline job, and queries
#[async_trait]
pub trait Timeseries: Send + Sync {
    /// Writes a batch of samples as one request
    async fn write_batch(&self, samples: &[Sample]) -> Result<(), TimeseriesError>;

    /// Evaluates an instant query at a point in time
    async fn query_instant(
        &self,
        expr: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<InstantResult>, TimeseriesError>;

    /// Evaluates a range query
    async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<RangeSeries>, TimeseriesError>;

    /// True when the store answers its health endpoint
    async fn health_check(&self) -> bool;
}

/// Production client over reqwest
pub struct TimeseriesClient {
    http: reqwest::Client,
    base_url: String,
}

const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

impl TimeseriesClient {
    /// Creates the client with pooled connections
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TimeseriesError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(20)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends one request with the transient-failure retry policy
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder + Send + Sync,
    ) -> Result<reqwest::Response, TimeseriesError> {
        let mut attempt = 0usize;
        loop {
            let result = build().send().await;
            let retryable = match &result {
                Ok(response) => {
                    let status = response.status();
                    status.as_u16() == 429 || status.is_server_error()
                }
                Err(e) => e.is_timeout() || e.is_connect(),
            };

            match result {
                Ok(response) if !retryable => return Ok(response),
                Ok(response) if attempt >= RETRY_BACKOFF.len() => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(TimeseriesError::Rejected { status, body });
                }
                Err(e) if !retryable || attempt >= RETRY_BACKOFF.len() => {
                    return Err(TimeseriesError::Transport(e));
                }
                _ => {
                    debug!(attempt, "retrying time-series request");
                    tokio::time::sleep(RETRY_BACKOFF[attempt.min(RETRY_BACKOFF.len() - 1)]).await;
                    attempt += 1;
                }
            }
        }
    }

    fn parse_vector(payload: &JsonValue) -> Result<Vec<InstantResult>, TimeseriesError> {
        let result = payload
            .pointer("/data/result")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| TimeseriesError::MalformedResponse {
                reason: "missing data.result".to_string(),
            })?;
        let mut out = Vec::with_capacity(result.len());
        for entry in result {
            let labels = Self::parse_labels(entry);
            let value = entry
                .pointer("/value/1")
                .and_then(JsonValue::as_str)
                .and_then(|s| s.parse::<f64>().ok());
            if let Some(value) = value {
                out.push(InstantResult { labels, value });
            }
        }
        Ok(out)
    }

    fn parse_matrix(payload: &JsonValue) -> Result<Vec<RangeSeries>, TimeseriesError> {
        let result = payload
            .pointer("/data/result")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| TimeseriesError::MalformedResponse {
                reason: "missing data.result".to_string(),
            })?;
        let mut out = Vec::with_capacity(result.len());
        for entry in result {
            let labels = Self::parse_labels(entry);
            let points = entry
                .pointer("/values")
                .and_then(JsonValue::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|pair| {
                            let ts = pair.get(0).and_then(JsonValue::as_f64)?;
                            let value = pair
                                .get(1)
                                .and_then(JsonValue::as_str)
                                .and_then(|s| s.parse::<f64>().ok())?;
                            #[allow(clippy::cast_possible_truncation)]
                            Some((ts as i64, value))
                        })
                        .collect()
                })
                .unwrap_or_default();
            out.push(RangeSeries { labels, points });
        }
        Ok(out)
    }

    fn parse_labels(entry: &JsonValue) -> HashMap<String, String> {
        entry
            .pointer("/metric")
            .and_then(JsonValue::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Timeseries for TimeseriesClient {
    async fn write_batch(&self, samples: &[Sample]) -> Result<(), TimeseriesError> {
        if samples.is_empty() {
            return Ok(());
        }
        let body = samples
            .iter()
            .map(Sample::to_line)
            .collect::<Vec<_>>()
            .join("\n");
        let url = self.url("/api/v1/import/prometheus");

        let response = self
            .send_with_retry(|| self.http.post(&url).body(body.clone()))
            .await?;
        if response.status().is_success() {
            debug!(count = samples.len(), "time-series batch written");
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, "time-series write rejected");
            Err(TimeseriesError::Rejected { status, body })
        }
    }

    async fn query_instant(
        &self,
        expr: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<InstantResult>, TimeseriesError> {
        let url = self.url("/api/v1/query");
        let time = at.timestamp().to_string();
        let response = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .query(&[("query", expr), ("time", time.as_str())])
            })
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TimeseriesError::Rejected { status, body });
        }
        let payload: JsonValue = response.json().await?;
        Self::parse_vector(&payload)
    }

    async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<RangeSeries>, TimeseriesError> {
        let url = self.url("/api/v1/query_range");
        let start_s = start.timestamp().to_string();
        let end_s = end.timestamp().to_string();
        let step_s = format!("{}s", step.as_secs());
        let response = self
            .send_with_retry(|| {
                self.http.get(&url).query(&[
                    ("query", expr),
                    ("start", start_s.as_str()),
                    ("end", end_s.as_str()),
                    ("step", step_s.as_str()),
                ])
            })
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TimeseriesError::Rejected { status, body });
        }
        let payload: JsonValue = response.json().await?;
        Self::parse_matrix(&payload)
    }

    async fn health_check(&self) -> bool {
        let url = self.url("/health");
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_should_render_line_format_when_sample_has_labels() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let sample = Sample::new("ping_rtt_ms", 12.5, ts)
            .with_label("device_id", "abc")
            .with_label("device_ip", "10.0.0.1");
        assert_eq!(
            sample.to_line(),
            "ping_rtt_ms{device_id=\"abc\",device_ip=\"10.0.0.1\"} 12.5 1735689600000"
        );
    }

    #[test]
    fn test_should_escape_quotes_when_label_value_contains_them() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let sample = Sample::new("m", 1.0, ts).with_label("name", "a\"b");
        assert!(sample.to_line().contains("name=\"a\\\"b\""));
    }

    #[test]
    fn test_should_pick_query_step_by_requested_range() {
        assert_eq!(
            step_for_range(Duration::from_secs(3600)),
            Duration::from_secs(300)
        );
        assert_eq!(
            step_for_range(Duration::from_secs(24 * 3600)),
            Duration::from_secs(300)
        );
        assert_eq!(
            step_for_range(Duration::from_secs(7 * 24 * 3600)),
            Duration::from_secs(900)
        );
        assert_eq!(
            step_for_range(Duration::from_secs(30 * 24 * 3600)),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_should_parse_instant_vector_when_payload_is_well_formed() {
        let payload: JsonValue = serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {"metric": {"device_ip": "10.0.0.1"}, "value": [1735689600, "42.5"]}
                ]
            }
        });
        let parsed = TimeseriesClient::parse_vector(&payload).expect("parses");
        assert_eq!(parsed.len(), 1);
        assert!((parsed[0].value - 42.5).abs() < f64::EPSILON);
        assert_eq!(parsed[0].labels["device_ip"], "10.0.0.1");
    }

    #[test]
    fn test_should_parse_range_matrix_when_payload_is_well_formed() {
        let payload: JsonValue = serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {"metric": {}, "values": [[1735689600, "1.0"], [1735689900, "2.0"]]}
                ]
            }
        });
        let parsed = TimeseriesClient::parse_matrix(&payload).expect("parses");
        assert_eq!(parsed[0].points, vec![(1_735_689_600, 1.0), (1_735_689_900, 2.0)]);
    }

    #[test]
    fn test_should_reject_malformed_payload_when_result_is_missing() {
        let payload: JsonValue = serde_json::json!({"status": "error"});
        assert!(TimeseriesClient::parse_vector(&payload).is_err());
    }
}
