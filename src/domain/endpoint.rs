use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Endpoint priority, drives alert level escalation
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of an endpoint: (source_id, endpoint_path)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub source_id: String,
    pub endpoint_path: String,
}

impl EndpointKey {
    pub fn new(source_id: impl Into<String>, endpoint_path: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            endpoint_path: endpoint_path.into(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.endpoint_path)
    }
}

fn default_check_interval() -> u64 {
    60
}

fn default_timeout_ms() -> u64 {
    5000
}

/// A monitored endpoint. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub source_id: String,
    pub endpoint_path: String,
    pub url: String,
    #[serde(default)]
    pub priority: Priority,
    /// Seconds between polls
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Per-poll timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum payload age before the data counts as stale
    #[serde(default)]
    pub freshness_secs: Option<u64>,
    /// JSON pointer to the payload timestamp (RFC 3339 or unix seconds)
    #[serde(default)]
    pub timestamp_field: Option<String>,
}

impl Endpoint {
    pub fn new(
        source_id: impl Into<String>,
        endpoint_path: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            endpoint_path: endpoint_path.into(),
            url: url.into(),
            priority: Priority::default(),
            check_interval_secs: default_check_interval(),
            timeout_ms: default_timeout_ms(),
            freshness_secs: None,
            timestamp_field: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn with_freshness(mut self, secs: u64, timestamp_field: impl Into<String>) -> Self {
        self.freshness_secs = Some(secs);
        self.timestamp_field = Some(timestamp_field.into());
        self
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(&self.source_id, &self.endpoint_path)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn freshness(&self) -> Option<Duration> {
        self.freshness_secs.map(Duration::from_secs)
    }

    /// Key under which the last-known-good payload is cached
    pub fn cache_key(&self) -> String {
        format!("lkg:{}:{}", self.source_id, self.endpoint_path)
    }
}

/// Catalog of monitored endpoints
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<HashMap<EndpointKey, Arc<Endpoint>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a static list, rejecting duplicates
    pub async fn from_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Result<Self> {
        let registry = Self::new();
        for endpoint in endpoints {
            registry.register(endpoint).await?;
        }
        Ok(registry)
    }

    /// Register an endpoint. Re-registering the same key is an error.
    pub async fn register(&self, endpoint: Endpoint) -> Result<Arc<Endpoint>> {
        url::Url::parse(&endpoint.url)?;

        let key = endpoint.key();
        let mut endpoints = self.endpoints.write().await;
        if endpoints.contains_key(&key) {
            return Err(VigilError::DuplicateEndpoint {
                source_id: key.source_id,
                endpoint_path: key.endpoint_path,
            });
        }

        let endpoint = Arc::new(endpoint);
        endpoints.insert(key.clone(), Arc::clone(&endpoint));
        info!("Registered endpoint {} ({})", key, endpoint.priority);
        Ok(endpoint)
    }

    /// Remove an endpoint from the catalog
    pub async fn deregister(&self, key: &EndpointKey) -> Option<Arc<Endpoint>> {
        let removed = self.endpoints.write().await.remove(key);
        if removed.is_some() {
            debug!("Deregistered endpoint {}", key);
        }
        removed
    }

    pub async fn get(&self, source_id: &str, endpoint_path: &str) -> Option<Arc<Endpoint>> {
        let key = EndpointKey::new(source_id, endpoint_path);
        self.endpoints.read().await.get(&key).cloned()
    }

    pub async fn require(&self, key: &EndpointKey) -> Result<Arc<Endpoint>> {
        self.endpoints
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| VigilError::UnknownEndpoint {
                source_id: key.source_id.clone(),
                endpoint_path: key.endpoint_path.clone(),
            })
    }

    /// All endpoints, ordered by key
    pub async fn list(&self) -> Vec<Arc<Endpoint>> {
        let endpoints = self.endpoints.read().await;
        let mut list: Vec<_> = endpoints.values().cloned().collect();
        list.sort_by(|a, b| a.key().cmp(&b.key()));
        list
    }

    pub async fn by_source(&self, source_id: &str) -> Vec<Arc<Endpoint>> {
        self.list()
            .await
            .into_iter()
            .filter(|e| e.source_id == source_id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }
}
