//! Durable store interface
//!
//! The pipeline depends only on `Store`; `InMemoryStore` backs tests and
//! store-less runs, `PostgresStore` backs production.

use crate::domain::{ErrorEvent, ErrorType};
use crate::error::Result;
use crate::healing::HealingStrategy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Filter for `Store::query_events`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub source_id: Option<String>,
    pub endpoint_path: Option<String>,
    pub error_type: Option<ErrorType>,
    pub resolved: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(mut self, source_id: impl Into<String>, endpoint_path: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self.endpoint_path = Some(endpoint_path.into());
        self
    }

    pub fn source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn error_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = Some(error_type);
        self
    }

    pub fn resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event: &ErrorEvent) -> bool {
        self.source_id.as_ref().map_or(true, |s| *s == event.source_id)
            && self
                .endpoint_path
                .as_ref()
                .map_or(true, |p| *p == event.endpoint_path)
            && self.error_type.map_or(true, |t| t == event.error_type)
            && self.resolved.map_or(true, |r| r == event.resolved)
            && self.since.map_or(true, |s| event.timestamp >= s)
    }
}

/// Durable store collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update an event by its (timestamp, source, endpoint) key
    async fn save_event(&self, event: &ErrorEvent) -> Result<()>;

    /// Insert or update a strategy's counters by name
    async fn save_strategy(&self, strategy: &HealingStrategy) -> Result<()>;

    /// Matching events, oldest first
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<ErrorEvent>>;

    /// Flush buffered writes
    async fn flush(&self) -> Result<()>;
}

type EventKeyTuple = (DateTime<Utc>, String, String);

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    events: RwLock<BTreeMap<EventKeyTuple, ErrorEvent>>,
    strategies: RwLock<HashMap<String, HealingStrategy>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn strategy(&self, name: &str) -> Option<HealingStrategy> {
        self.strategies.read().await.get(name).cloned()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_event(&self, event: &ErrorEvent) -> Result<()> {
        let key = (
            event.timestamp,
            event.source_id.clone(),
            event.endpoint_path.clone(),
        );
        self.events.write().await.insert(key, event.clone());
        Ok(())
    }

    async fn save_strategy(&self, strategy: &HealingStrategy) -> Result<()> {
        self.strategies
            .write()
            .await
            .insert(strategy.name.clone(), strategy.clone());
        Ok(())
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<ErrorEvent>> {
        let events = self.events.read().await;
        let mut matched: Vec<ErrorEvent> = events
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(offset_secs: i64, source: &str, error_type: ErrorType) -> ErrorEvent {
        let base = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        ErrorEvent::new(base + Duration::seconds(offset_secs), source, "/quote", error_type)
    }

    #[tokio::test]
    async fn test_save_event_upserts_by_key() {
        let store = InMemoryStore::new();
        let mut e = event(0, "alpha", ErrorType::Timeout);
        store.save_event(&e).await.unwrap();

        e.resolve("reprobe");
        store.save_event(&e).await.unwrap();

        assert_eq!(store.event_count().await, 1);
        let found = store.query_events(&EventQuery::new()).await.unwrap();
        assert!(found[0].resolved);
        assert_eq!(found[0].fix_method.as_deref(), Some("reprobe"));
    }

    #[tokio::test]
    async fn test_query_filters_and_limit() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.save_event(&event(i, "alpha", ErrorType::Timeout)).await.unwrap();
        }
        store.save_event(&event(10, "beta", ErrorType::RateLimit)).await.unwrap();

        let alpha = store
            .query_events(&EventQuery::new().source("alpha").limit(2))
            .await
            .unwrap();
        assert_eq!(alpha.len(), 2);
        assert!(alpha[0].timestamp < alpha[1].timestamp);
        assert_eq!(alpha[1], event(4, "alpha", ErrorType::Timeout));

        let limited = store
            .query_events(&EventQuery::new().error_type(ErrorType::RateLimit))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].source_id, "beta");

        let unresolved = store
            .query_events(&EventQuery::new().resolved(false))
            .await
            .unwrap();
        assert_eq!(unresolved.len(), 6);
    }
}
