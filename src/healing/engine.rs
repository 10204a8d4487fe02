//! Healing engine
//!
//! Drives one ErrorEvent through
//! `Detected -> Selecting -> Applying -> Verifying -> (Resolved | Exhausted)`.
//! Candidates are tried in ranked order, each at most once, and the event gets
//! at most `max_attempts` attempts in total.

use super::catalog::StrategyCatalog;
use super::executor::{ActionOutcome, BackoffConfig, HealingContext, StrategyExecutor};
use super::selector::StrategySelector;
use super::strategy::HealingStrategy;
use crate::coordination::ShutdownToken;
use crate::domain::{Endpoint, ErrorEvent, HealingPhase, PhaseTransition};
use crate::error::{Result, VigilError};
use crate::learning::{LearningStore, Pattern};
use crate::persistence::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Healing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Attempts per event across all candidates (default: 3)
    pub max_attempts: u32,
    /// Probe again after a strategy that cannot confirm its own success (default: true)
    pub verify_with_probe: bool,
    pub backoff: BackoffConfig,
    /// Timeout multiplier for extended_timeout_retry (default: 2.0)
    pub timeout_extension_factor: f64,
    /// Upper bound for extended timeouts (default: 60s)
    pub max_timeout_ms: u64,
    /// Replaces the built-in catalog when non-empty
    pub strategies: Vec<HealingStrategy>,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            verify_with_probe: true,
            backoff: BackoffConfig::default(),
            timeout_extension_factor: 2.0,
            max_timeout_ms: 60_000,
            strategies: Vec::new(),
        }
    }
}

/// How healing ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HealingOutcome {
    Resolved { strategy: String },
    Exhausted,
    /// Cancelled by shutdown before a verdict
    Aborted,
}

/// One strategy attempt within an event
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub strategy: String,
    pub success: bool,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct HealingReport {
    pub event: ErrorEvent,
    pub outcome: HealingOutcome,
    pub attempts: Vec<AttemptRecord>,
    pub transitions: Vec<PhaseTransition>,
}

impl HealingReport {
    pub fn is_resolved(&self) -> bool {
        matches!(self.outcome, HealingOutcome::Resolved { .. })
    }
}

/// Phase of one event, with every transition checked
struct PhaseTracker {
    phase: HealingPhase,
    transitions: Vec<PhaseTransition>,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: HealingPhase::Detected,
            transitions: Vec::new(),
        }
    }

    fn advance(&mut self, to: HealingPhase, reason: impl Into<String>) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(VigilError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        let transition = PhaseTransition::new(self.phase, to, reason);
        debug!("{} -> {}: {}", transition.from, transition.to, transition.reason);
        self.transitions.push(transition);
        self.phase = to;
        Ok(())
    }
}

pub struct HealingEngine {
    config: HealingConfig,
    catalog: Arc<StrategyCatalog>,
    selector: StrategySelector,
    learning: Arc<LearningStore>,
    executor: Arc<dyn StrategyExecutor>,
    store: Arc<dyn Store>,
}

impl HealingEngine {
    pub fn new(
        config: HealingConfig,
        catalog: Arc<StrategyCatalog>,
        learning: Arc<LearningStore>,
        executor: Arc<dyn StrategyExecutor>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            config,
            catalog,
            selector: StrategySelector::new(Arc::clone(&learning)),
            learning,
            executor,
            store,
        }
    }

    pub fn catalog(&self) -> &StrategyCatalog {
        &self.catalog
    }

    /// Heal one event. Never fails: every problem ends as `Exhausted` or
    /// `Aborted` for the alert manager to judge.
    pub async fn heal(
        &self,
        event: ErrorEvent,
        endpoint: Arc<Endpoint>,
        token: &mut ShutdownToken,
    ) -> HealingReport {
        let mut tracker = PhaseTracker::new();
        let mut attempts = Vec::new();
        let mut event = event;

        let outcome = match self
            .run(&mut event, endpoint, token, &mut tracker, &mut attempts)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Healing {} failed internally: {}", event.fingerprint(), e);
                HealingOutcome::Exhausted
            }
        };

        match &outcome {
            HealingOutcome::Resolved { strategy } => info!(
                "Healed {} with {} after {} attempt(s)",
                event.fingerprint(),
                strategy,
                attempts.len()
            ),
            HealingOutcome::Exhausted => warn!(
                "Healing exhausted for {} after {} attempt(s)",
                event.fingerprint(),
                attempts.len()
            ),
            HealingOutcome::Aborted => warn!("Healing aborted for {}", event.fingerprint()),
        }

        HealingReport {
            event,
            outcome,
            attempts,
            transitions: tracker.transitions,
        }
    }

    async fn run(
        &self,
        event: &mut ErrorEvent,
        endpoint: Arc<Endpoint>,
        token: &mut ShutdownToken,
        tracker: &mut PhaseTracker,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<HealingOutcome> {
        tracker.advance(HealingPhase::Selecting, "event classified")?;
        let ranked = self.selector.rank(event, self.catalog.strategies());
        if ranked.is_empty() {
            tracker.advance(HealingPhase::Exhausted, "no applicable strategy")?;
            return Ok(HealingOutcome::Exhausted);
        }

        let budget = self.config.max_attempts.max(1) as usize;
        for (index, candidate) in ranked.iter().take(budget).enumerate() {
            let strategy = &candidate.strategy;
            tracker.advance(HealingPhase::Applying, format!("trying {}", strategy.name))?;

            let pattern = Pattern::new(event.error_type, &strategy.name);
            let ctx = HealingContext {
                event: &*event,
                endpoint: Arc::clone(&endpoint),
                attempt: index as u32,
                learned_param: self.learning.param_estimate(&event.source_id, &pattern),
            };

            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    tracker.advance(HealingPhase::Exhausted, "cancelled")?;
                    return Ok(HealingOutcome::Aborted);
                }
                outcome = self.executor.apply(&ctx, strategy) => outcome,
            };

            let success = if outcome.success {
                tracker.advance(HealingPhase::Verifying, outcome.detail.clone())?;
                self.confirm(&outcome, &endpoint, token).await
            } else {
                Some(false)
            };
            let Some(success) = success else {
                tracker.advance(HealingPhase::Exhausted, "cancelled during verification")?;
                return Ok(HealingOutcome::Aborted);
            };

            self.record(event, strategy, success, &outcome).await;
            attempts.push(AttemptRecord {
                strategy: strategy.name.clone(),
                success,
                detail: outcome.detail,
            });

            if success {
                tracker.advance(HealingPhase::Resolved, format!("{} succeeded", strategy.name))?;
                event.resolve(&strategy.name);
                return Ok(HealingOutcome::Resolved {
                    strategy: strategy.name.clone(),
                });
            }
            debug!("{} did not heal {}", strategy.name, event.fingerprint());
        }

        tracker.advance(
            HealingPhase::Exhausted,
            format!("{} attempt(s) failed", attempts.len()),
        )?;
        Ok(HealingOutcome::Exhausted)
    }

    /// `None` when cancelled
    async fn confirm(
        &self,
        outcome: &ActionOutcome,
        endpoint: &Arc<Endpoint>,
        token: &mut ShutdownToken,
    ) -> Option<bool> {
        if outcome.verified || !self.config.verify_with_probe {
            return Some(true);
        }
        tokio::select! {
            _ = token.cancelled() => None,
            healthy = self.executor.verify(Arc::clone(endpoint)) => Some(healthy),
        }
    }

    /// Learning first (synchronous, atomic per source), then the durable
    /// strategy snapshot on a best-effort basis
    async fn record(
        &self,
        event: &ErrorEvent,
        strategy: &HealingStrategy,
        success: bool,
        outcome: &ActionOutcome,
    ) {
        self.learning.record_attempt(
            &event.source_id,
            event.error_type,
            &strategy.name,
            success,
            outcome.param,
        );

        if let Some(snapshot) = self.catalog.snapshot_of(&strategy.name, &self.learning) {
            if let Err(e) = self.store.save_strategy(&snapshot).await {
                error!("Failed to persist strategy {}: {}", strategy.name, e);
            }
        }
    }
}
