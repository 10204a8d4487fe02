//! Healing pipeline
//!
//! Monitor -> Classifier -> Healing engine -> Learning store -> Alert manager
//! -> Escalation. Every component is owned here and handed out by reference;
//! there is no global state.

use crate::classifier::{classify, StatusBoard};
use crate::config::AppConfig;
use crate::coordination::{
    GracefulShutdown, ShutdownConfig, ShutdownSignal, ShutdownToken, StepFuture,
};
use crate::domain::{EndpointKey, EndpointRegistry, EndpointStatus, HealthCheckResult};
use crate::error::Result;
use crate::healing::{
    ActionExecutor, FallbackResolver, HealingEngine, HealingOutcome, HealingReport,
    StrategyCatalog, StrategyExecutor,
};
use crate::learning::LearningStore;
use crate::monitor::{HealthMonitor, MonitorScheduler, Prober};
use crate::persistence::{Cache, Store};
use crate::supervisor::{
    AlertManager, AlertUpdate, EscalationCollaborator, EscalationContext, EscalationResult,
    Escalator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long cancelled healing tasks get to unwind before they are aborted
const ABORT_UNWIND: Duration = Duration::from_secs(1);

/// External collaborators the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub prober: Arc<dyn Prober>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub escalation: Arc<dyn EscalationCollaborator>,
}

/// What happened to one poll result
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub endpoint: EndpointKey,
    pub status: EndpointStatus,
    pub healing: Option<HealingReport>,
    pub alert: Option<AlertUpdate>,
    pub escalation: Option<EscalationResult>,
}

pub struct Pipeline {
    registry: Arc<EndpointRegistry>,
    monitor: Arc<HealthMonitor>,
    board: Arc<StatusBoard>,
    engine: Arc<HealingEngine>,
    learning: Arc<LearningStore>,
    fallback: Arc<FallbackResolver>,
    alerts: Arc<AlertManager>,
    escalator: Arc<Escalator>,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    cache_ttl: Duration,
    pool_size: usize,
}

impl Pipeline {
    /// Wire every component from configuration
    pub async fn build(config: &AppConfig, collaborators: Collaborators) -> Result<Self> {
        let registry = Arc::new(EndpointRegistry::from_endpoints(config.endpoints.clone()).await?);
        let monitor = Arc::new(HealthMonitor::new(collaborators.prober));
        let fallback = Arc::new(FallbackResolver::new(&config.fallback));
        let learning = Arc::new(LearningStore::new(config.learning.clone()));
        let catalog = Arc::new(StrategyCatalog::from_config(&config.healing.strategies)?);

        let executor: Arc<dyn StrategyExecutor> = Arc::new(ActionExecutor::new(
            Arc::clone(&monitor),
            Arc::clone(&collaborators.cache),
            Arc::clone(&fallback),
            Arc::clone(&registry),
            &config.healing,
            config.cache.ttl(),
        ));
        let engine = Arc::new(HealingEngine::new(
            config.healing.clone(),
            catalog,
            Arc::clone(&learning),
            executor,
            Arc::clone(&collaborators.store),
        ));

        info!(
            "Pipeline ready: {} endpoints, {} strategies, {} fallback chains",
            registry.len().await,
            engine.catalog().len(),
            config.fallback.len()
        );

        Ok(Self {
            registry,
            monitor,
            board: Arc::new(StatusBoard::new(config.classifier.clone())),
            engine,
            learning,
            fallback,
            alerts: Arc::new(AlertManager::new(config.alerts.clone())),
            escalator: Arc::new(Escalator::new(
                config.escalation.clone(),
                collaborators.escalation,
            )),
            store: collaborators.store,
            cache: collaborators.cache,
            cache_ttl: config.cache.ttl(),
            pool_size: config.monitor.pool_size,
        })
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    pub fn engine(&self) -> &Arc<HealingEngine> {
        &self.engine
    }

    pub fn learning(&self) -> &Arc<LearningStore> {
        &self.learning
    }

    pub fn fallback(&self) -> &Arc<FallbackResolver> {
        &self.fallback
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn escalator(&self) -> &Arc<Escalator> {
        &self.escalator
    }

    /// Run one poll result through the pipeline. Never fails.
    pub async fn process(
        &self,
        result: HealthCheckResult,
        token: &mut ShutdownToken,
    ) -> ProcessReport {
        let key = result.endpoint_key();
        let endpoint = Arc::clone(&result.endpoint);

        let Some(event) = classify(&result) else {
            let status = self.board.observe(&key, false, result.timestamp);
            if let Some(payload) = result.payload {
                self.cache
                    .set(&endpoint.cache_key(), payload, self.cache_ttl)
                    .await;
            }
            let healed = self.alerts.endpoint_recovered(&key, result.timestamp);
            debug!("{} healthy ({}), {} alert(s) healed", key, status, healed.len());
            return ProcessReport {
                endpoint: key,
                status,
                healing: None,
                alert: None,
                escalation: None,
            };
        };

        let status = self.board.observe(&key, true, event.timestamp);
        debug!("{} failed with {} ({})", key, event.error_type, status);
        if let Err(e) = self.store.save_event(&event).await {
            error!("Failed to save event for {}: {}", key, e);
        }

        let report = self.engine.heal(event, Arc::clone(&endpoint), token).await;
        if let Err(e) = self.store.save_event(&report.event).await {
            error!("Failed to update event for {}: {}", key, e);
        }

        if report.outcome == HealingOutcome::Aborted {
            return ProcessReport {
                endpoint: key,
                status,
                healing: Some(report),
                alert: None,
                escalation: None,
            };
        }

        let (alert, escalation) = match self.alerts.evaluate(&report.event, endpoint.priority) {
            Some(update) if update.escalate => {
                let context = self.escalation_context(&report);
                let result = self.escalator.escalate(&update.alert, &context).await;
                let delivered = result == EscalationResult::Sent;
                let alert = self
                    .alerts
                    .complete_escalation(&update.alert, delivered)
                    .unwrap_or(update.alert);
                (Some(AlertUpdate { alert, ..update }), Some(result))
            }
            other => (other, None),
        };

        ProcessReport {
            endpoint: key,
            status,
            healing: Some(report),
            alert,
            escalation,
        }
    }

    fn escalation_context(&self, report: &HealingReport) -> EscalationContext {
        let event = &report.event;
        let mut rates = self.learning.strategy_rates();
        rates.extend(self.learning.source_strategy_rates(&event.source_id));

        EscalationContext {
            events: self.alerts.history(&event.fingerprint()),
            rates,
            health: self.board.snapshot(),
        }
    }

    /// Poll every registered endpoint until shutdown, then drain and flush
    pub async fn run(self: Arc<Self>, shutdown: Arc<GracefulShutdown>) -> Result<()> {
        let endpoints = self.registry.list().await;
        if endpoints.is_empty() {
            warn!("No endpoints registered, waiting for shutdown");
        }

        let (tx, mut rx) = mpsc::channel::<HealthCheckResult>(self.pool_size.max(1) * 4);
        let mut scheduler = MonitorScheduler::new(Arc::clone(&self.monitor), self.pool_size);
        // `tx` stays alive until shutdown so an empty registry idles instead of exiting
        scheduler.spawn_all(endpoints, tx.clone(), shutdown.token());

        let aggregator = tokio::spawn(Arc::clone(&self.learning).run_aggregator(shutdown.token()));

        // Healing has its own cancellation so it can outlive the poll shutdown
        // by the grace period.
        let heal_shutdown = Arc::new(GracefulShutdown::new(ShutdownConfig::default()));
        let mut healing: JoinSet<()> = JoinSet::new();
        let mut token = shutdown.token();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = rx.recv() => match received {
                    Some(result) => {
                        let pipeline = Arc::clone(&self);
                        let mut heal_token = heal_shutdown.token();
                        healing.spawn(async move {
                            pipeline.process(result, &mut heal_token).await;
                        });
                    }
                    None => {
                        info!("All poll tasks finished");
                        break;
                    }
                },
                Some(joined) = healing.join_next(), if !healing.is_empty() => {
                    if let Err(e) = joined {
                        error!("Healing task panicked: {}", e);
                    }
                }
            }
        }

        if !shutdown.is_shutdown_requested() {
            shutdown.request_shutdown(ShutdownSignal::Graceful);
        }

        let store = Arc::clone(&self.store);
        shutdown
            .execute(
                move || -> StepFuture<()> {
                    Box::pin(async move {
                        drop(tx);
                        drop(rx);
                        scheduler.stop().await;
                    })
                },
                move |grace| -> StepFuture<usize> {
                    Box::pin(drain_healing(healing, grace, heal_shutdown))
                },
                move || -> StepFuture<std::result::Result<(), String>> {
                    Box::pin(async move { store.flush().await.map_err(|e| e.to_string()) })
                },
            )
            .await;

        if let Err(e) = aggregator.await {
            error!("Learning aggregator panicked: {}", e);
        }
        Ok(())
    }
}

/// Wait up to `grace` for healing tasks, then cancel the rest.
/// Returns how many were cut short.
async fn drain_healing(
    mut healing: JoinSet<()>,
    grace: Duration,
    heal_shutdown: Arc<GracefulShutdown>,
) -> usize {
    let finished = tokio::time::timeout(grace, async {
        while healing.join_next().await.is_some() {}
    })
    .await;
    if finished.is_ok() {
        return 0;
    }

    let remaining = healing.len();
    heal_shutdown.request_shutdown(ShutdownSignal::Urgent);
    let unwound = tokio::time::timeout(ABORT_UNWIND, async {
        while healing.join_next().await.is_some() {}
    })
    .await;
    if unwound.is_err() {
        healing.abort_all();
        while healing.join_next().await.is_some() {}
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Endpoint, ErrorType, RawStatus};
    use crate::healing::{HealingStrategy, StrategyAction};
    use crate::persistence::{EventQuery, InMemoryCache, InMemoryStore};
    use crate::supervisor::{AlertStatus, LogEscalator};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of statuses, then repeats the last one
    struct ScriptedProber {
        script: Mutex<VecDeque<u16>>,
    }

    impl ScriptedProber {
        fn new(script: impl IntoIterator<Item = u16>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, endpoint: Arc<Endpoint>, _timeout: Duration) -> HealthCheckResult {
            let status = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    *script.front().unwrap_or(&200)
                }
            };
            let result = HealthCheckResult::new(
                endpoint,
                RawStatus::Http(status),
                Duration::from_millis(3),
            );
            if status == 200 {
                result.with_payload("{\"ok\":true}".to_string(), true)
            } else {
                result
            }
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.endpoints = vec![Endpoint::new("X", "/quote", "http://x.example.com/quote")];
        config.healing.strategies = vec![HealingStrategy::new(
            "reprobe",
            1,
            StrategyAction::Reprobe,
            ErrorType::ALL,
        )];
        config
    }

    async fn pipeline(script: Vec<u16>) -> (Pipeline, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::build(
            &config(),
            Collaborators {
                prober: Arc::new(ScriptedProber::new(script)),
                store: store.clone(),
                cache: Arc::new(InMemoryCache::new()),
                escalation: Arc::new(LogEscalator),
            },
        )
        .await
        .unwrap();
        (pipeline, store)
    }

    async fn failed_poll(pipeline: &Pipeline, status: u16) -> HealthCheckResult {
        let endpoint = pipeline.registry().get("X", "/quote").await.unwrap();
        HealthCheckResult::new(endpoint, RawStatus::Http(status), Duration::from_millis(3))
    }

    #[tokio::test]
    async fn test_healed_event_is_persisted_resolved() {
        let (pipeline, store) = pipeline(vec![200]).await;
        let result = failed_poll(&pipeline, 503).await;

        let report = pipeline.process(result, &mut ShutdownToken::never()).await;
        assert!(report.healing.unwrap().is_resolved());
        assert!(report.alert.is_none());

        let events = store.query_events(&EventQuery::new()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].resolved);
        assert_eq!(events[0].fix_method.as_deref(), Some("reprobe"));
    }

    #[tokio::test]
    async fn test_unresolved_event_opens_alert() {
        let (pipeline, _store) = pipeline(vec![503]).await;
        let result = failed_poll(&pipeline, 503).await;

        let report = pipeline.process(result, &mut ShutdownToken::never()).await;
        let update = report.alert.unwrap();
        assert!(update.created);
        assert_eq!(update.alert.status, AlertStatus::Open);
        assert_eq!(update.alert.fingerprint.error_type, ErrorType::ServerError);
        assert!(report.escalation.is_none());
    }

    #[tokio::test]
    async fn test_healthy_poll_caches_and_heals_alerts() {
        let (pipeline, _store) = pipeline(vec![503]).await;
        pipeline
            .process(failed_poll(&pipeline, 503).await, &mut ShutdownToken::never())
            .await;
        assert_eq!(pipeline.alerts().active_count(), 1);

        let endpoint = pipeline.registry().get("X", "/quote").await.unwrap();
        let healthy = HealthCheckResult::new(
            Arc::clone(&endpoint),
            RawStatus::Http(200),
            Duration::from_millis(3),
        )
        .with_payload("{\"price\":1}".to_string(), true);
        let report = pipeline.process(healthy, &mut ShutdownToken::never()).await;

        assert!(report.healing.is_none());
        assert_eq!(pipeline.alerts().active_count(), 0);
        assert_eq!(
            pipeline.cache.get(&endpoint.cache_key()).await.as_deref(),
            Some("{\"price\":1}")
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (pipeline, _store) = pipeline(vec![200]).await;
        let pipeline = Arc::new(pipeline);
        let shutdown = Arc::new(GracefulShutdown::new(ShutdownConfig {
            grace_secs: 1,
            store_flush_timeout_secs: 1,
        }));

        let handle = tokio::spawn(Arc::clone(&pipeline).run(Arc::clone(&shutdown)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let finished = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(finished.unwrap().unwrap().is_ok());
        assert_eq!(
            shutdown.current_phase(),
            crate::coordination::ShutdownPhase::Complete
        );
    }
}
