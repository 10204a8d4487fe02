//! Endpoint probes
//!
//! A probe never fails: every transport or protocol problem is folded into the
//! returned `HealthCheckResult`.

use crate::domain::{Endpoint, HealthCheckResult, RawStatus};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for the health monitor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Maximum concurrent in-flight polls (default: 16)
    pub pool_size: usize,
    /// User agent sent with every probe
    pub user_agent: String,
    /// Bodies larger than this count as invalid data (default: 1 MiB)
    pub max_payload_bytes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            user_agent: format!("vigil/{}", env!("CARGO_PKG_VERSION")),
            max_payload_bytes: 1024 * 1024,
        }
    }
}

/// Something that can check one endpoint
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `endpoint`, giving up after `timeout`
    async fn probe(&self, endpoint: Arc<Endpoint>, timeout: Duration) -> HealthCheckResult;
}

/// HTTP GET prober
pub struct HttpProber {
    client: Client,
    max_payload_bytes: usize,
}

impl HttpProber {
    pub fn new(config: &MonitorConfig) -> crate::Result<Self> {
        let client = Client::builder().user_agent(&config.user_agent).build()?;
        Ok(Self {
            client,
            max_payload_bytes: config.max_payload_bytes,
        })
    }

    fn map_error(err: &reqwest::Error) -> RawStatus {
        if err.is_timeout() {
            RawStatus::Timeout
        } else if err.is_connect() || err.is_request() {
            RawStatus::ConnectionFailed(err.to_string())
        } else {
            RawStatus::Other(err.to_string())
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: Arc<Endpoint>, timeout: Duration) -> HealthCheckResult {
        let started = Instant::now();

        let response = match self.client.get(&endpoint.url).timeout(timeout).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("Probe {} failed: {}", endpoint.key(), e);
                return HealthCheckResult::new(endpoint, Self::map_error(&e), started.elapsed());
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return HealthCheckResult::new(endpoint, RawStatus::Http(status), started.elapsed());
        }

        let body = match read_bounded(response, self.max_payload_bytes).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!(
                    "Body from {} exceeds {} bytes",
                    endpoint.key(),
                    self.max_payload_bytes
                );
                return HealthCheckResult::new(endpoint, RawStatus::Http(status), started.elapsed());
            }
            Err(e) => {
                warn!("Reading body from {} failed: {}", endpoint.key(), e);
                return HealthCheckResult::new(endpoint, Self::map_error(&e), started.elapsed());
            }
        };
        let latency = started.elapsed();

        let (valid, age) = inspect_payload(&endpoint, &body, self.max_payload_bytes, Utc::now());
        let mut result =
            HealthCheckResult::new(endpoint, RawStatus::Http(status), latency).with_payload(body, valid);
        if let Some(age) = age {
            result = result.with_payload_age(age);
        }
        result
    }
}

/// Read a response body, stopping as soon as it passes `limit` bytes.
/// `None` when the body is too large.
async fn read_bounded(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Option<String>, reqwest::Error> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Ok(None);
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(String::from_utf8_lossy(&body).into_owned()))
}

/// Validate a body and extract its age from the declared timestamp field
pub fn inspect_payload(
    endpoint: &Endpoint,
    body: &str,
    max_bytes: usize,
    now: DateTime<Utc>,
) -> (bool, Option<Duration>) {
    if body.len() > max_bytes {
        return (false, None);
    }

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (false, None),
    };

    let empty = match &value {
        serde_json::Value::Null => true,
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        return (false, None);
    }

    let age = endpoint
        .timestamp_field
        .as_deref()
        .and_then(|pointer| value.pointer(pointer))
        .and_then(parse_timestamp)
        .map(|ts| (now - ts).to_std().unwrap_or(Duration::ZERO));

    (true, age)
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        serde_json::Value::Number(n) => {
            let raw = n.as_f64()?;
            // Millisecond epochs are 13 digits
            let secs = if raw > 1e12 { raw / 1000.0 } else { raw };
            Utc.timestamp_opt(secs.trunc() as i64, 0).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::new("alpha", "/quote", "https://alpha.example.com/quote")
            .with_freshness(60, "/updated_at")
    }

    #[test]
    fn test_inspect_rejects_non_json_and_empty() {
        let now = Utc::now();
        assert_eq!(inspect_payload(&endpoint(), "<html>", 1024, now), (false, None));
        assert_eq!(inspect_payload(&endpoint(), "{}", 1024, now), (false, None));
        assert_eq!(inspect_payload(&endpoint(), "[]", 1024, now), (false, None));
        assert_eq!(inspect_payload(&endpoint(), "null", 1024, now), (false, None));
    }

    #[test]
    fn test_inspect_rejects_oversized() {
        let body = r#"{"price": 1.0}"#;
        assert_eq!(inspect_payload(&endpoint(), body, 4, Utc::now()), (false, None));
    }

    #[test]
    fn test_inspect_extracts_rfc3339_age() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let body = r#"{"price": 1.0, "updated_at": "2026-01-01T11:58:00Z"}"#;
        let (valid, age) = inspect_payload(&endpoint(), body, 1024, now);
        assert!(valid);
        assert_eq!(age, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_inspect_extracts_epoch_millis_age() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let millis = (now.timestamp() - 30) * 1000;
        let body = format!(r#"{{"updated_at": {}}}"#, millis);
        let (valid, age) = inspect_payload(&endpoint(), &body, 1024, now);
        assert!(valid);
        assert_eq!(age, Some(Duration::from_secs(30)));
    }

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_probe_stops_reading_oversized_bodies() {
        use axum::body::Body;
        use axum::routing::get;

        let router = axum::Router::new()
            .route("/small", get(|| async { r#"{"price": 1.0}"# }))
            .route("/large", get(|| async { "x".repeat(4096) }))
            .route(
                "/streamed",
                get(|| async {
                    // No content-length: the limit has to stop the chunked read
                    let chunks = (0..64)
                        .map(|_| Ok::<_, std::io::Error>("[1,2,3,4,5,6,7,8],".to_string()));
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            );
        let base = serve(router).await;
        let prober = HttpProber::new(&MonitorConfig {
            max_payload_bytes: 256,
            ..Default::default()
        })
        .unwrap();

        for (path, valid) in [("/small", true), ("/large", false), ("/streamed", false)] {
            let endpoint = Arc::new(Endpoint::new("local", path, format!("{}{}", base, path)));
            let result = prober.probe(endpoint, Duration::from_secs(5)).await;
            assert_eq!(result.raw_status, RawStatus::Http(200), "{}", path);
            assert_eq!(result.payload_valid, valid, "{}", path);
            assert_eq!(result.payload.is_some(), valid, "{}", path);
        }
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let body = r#"{"updated_at": "2026-01-01T12:05:00Z"}"#;
        let (_, age) = inspect_payload(&endpoint(), body, 1024, now);
        assert_eq!(age, Some(Duration::ZERO));
    }
}
