//! Hierarchical learning store
//!
//! Each source owns one ledger holding both its inner records and its strategy
//! counters, behind a single lock, so an attempt is recorded as one unit. The
//! outer layer is an immutable snapshot swapped in by `aggregate`.

use super::records::{aggregate, InnerRecord, OuterRecord, Pattern, StrategyCounters};
use crate::coordination::ShutdownToken;
use crate::domain::ErrorType;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Learning configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Inner samples needed before the inner layer is trusted (default: 10)
    pub min_samples: u64,
    /// Smoothing factor for parameter estimates (default: 0.3)
    pub ema_alpha: f64,
    /// Outer layer recompute period (default: 300s)
    pub aggregation_interval_secs: u64,
    /// Also recompute after this many outcomes; 0 disables (default: 50)
    pub aggregate_every_outcomes: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            ema_alpha: 0.3,
            aggregation_interval_secs: 300,
            aggregate_every_outcomes: 50,
        }
    }
}

impl LearningConfig {
    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_secs.max(1))
    }
}

/// Which layer an estimate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Inner,
    Outer,
}

/// Success-rate estimate handed to the selector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateEstimate {
    pub rate: f64,
    pub samples: u64,
    pub layer: Layer,
}

/// Derived cross-source layer
#[derive(Debug, Clone, Default)]
pub struct OuterSnapshot {
    pub records: HashMap<Pattern, OuterRecord>,
    pub computed_at: Option<DateTime<Utc>>,
    pub generation: u64,
}

/// Consistent read of one source's ledger
#[derive(Debug, Clone, Default)]
pub struct SourceView {
    pub inner: Vec<InnerRecord>,
    pub strategies: BTreeMap<String, StrategyCounters>,
}

/// Strategy counters for reporting, global or per source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRate {
    pub strategy: String,
    pub source_id: Option<String>,
    pub success_count: u64,
    pub fail_count: u64,
    pub success_rate: f64,
}

impl StrategyRate {
    fn from_counters(strategy: &str, source_id: Option<&str>, c: &StrategyCounters) -> Self {
        Self {
            strategy: strategy.to_string(),
            source_id: source_id.map(str::to_string),
            success_count: c.success_count,
            fail_count: c.fail_count,
            success_rate: c.success_rate(),
        }
    }
}

/// Per-(source, error_type) rollup across strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRollup {
    pub source_id: String,
    pub error_type: ErrorType,
    pub occurrence_count: u64,
    pub success_count: u64,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct SourceLedger {
    inner: HashMap<Pattern, InnerRecord>,
    strategies: HashMap<String, StrategyCounters>,
}

pub struct LearningStore {
    config: LearningConfig,
    ledgers: DashMap<String, Arc<Mutex<SourceLedger>>>,
    outer: RwLock<Arc<OuterSnapshot>>,
    outcomes_since_aggregate: AtomicU64,
    aggregate_due: Notify,
}

impl LearningStore {
    pub fn new(config: LearningConfig) -> Self {
        Self {
            config,
            ledgers: DashMap::new(),
            outer: RwLock::new(Arc::new(OuterSnapshot::default())),
            outcomes_since_aggregate: AtomicU64::new(0),
            aggregate_due: Notify::new(),
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    fn ledger(&self, source_id: &str) -> Arc<Mutex<SourceLedger>> {
        if let Some(ledger) = self.ledgers.get(source_id) {
            return Arc::clone(ledger.value());
        }
        Arc::clone(
            self.ledgers
                .entry(source_id.to_string())
                .or_default()
                .value(),
        )
    }

    /// Record one healing attempt. The strategy counters and the inner record
    /// for (source, error_type, strategy) change together under the source lock.
    pub fn record_attempt(
        &self,
        source_id: &str,
        error_type: ErrorType,
        strategy: &str,
        success: bool,
        param: Option<f64>,
    ) -> InnerRecord {
        let now = Utc::now();
        let pattern = Pattern::new(error_type, strategy);
        let ledger = self.ledger(source_id);

        let record = {
            let mut guard = ledger.lock().unwrap_or_else(PoisonError::into_inner);
            guard
                .strategies
                .entry(strategy.to_string())
                .or_default()
                .record(success);
            let record = guard
                .inner
                .entry(pattern.clone())
                .or_insert_with(|| InnerRecord::new(source_id, pattern, now));
            record.record(success, param, self.config.ema_alpha, now);
            record.clone()
        };

        let pending = self.outcomes_since_aggregate.fetch_add(1, Ordering::SeqCst) + 1;
        if self.config.aggregate_every_outcomes > 0 && pending >= self.config.aggregate_every_outcomes
        {
            self.aggregate_due.notify_one();
        }

        debug!(
            "Learned {}:{} success={} (n={}, rate={:.3})",
            source_id, record.pattern, success, record.occurrence_count, record.success_rate
        );
        record
    }

    pub fn inner(&self, source_id: &str, pattern: &Pattern) -> Option<InnerRecord> {
        let ledger = self.ledgers.get(source_id).map(|l| Arc::clone(l.value()))?;
        let guard = ledger.lock().unwrap_or_else(PoisonError::into_inner);
        guard.inner.get(pattern).cloned()
    }

    pub fn outer(&self, pattern: &Pattern) -> Option<OuterRecord> {
        self.outer_snapshot().records.get(pattern).cloned()
    }

    pub fn outer_snapshot(&self) -> Arc<OuterSnapshot> {
        let guard = self.outer.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Inner rate once it has `min_samples`, otherwise the outer prior
    pub fn success_estimate(&self, source_id: &str, pattern: &Pattern) -> Option<RateEstimate> {
        if let Some(inner) = self.inner(source_id, pattern) {
            if inner.is_authoritative(self.config.min_samples) {
                return Some(RateEstimate {
                    rate: inner.success_rate,
                    samples: inner.occurrence_count,
                    layer: Layer::Inner,
                });
            }
        }

        self.outer(pattern)
            .filter(|outer| outer.occurrence_count > 0)
            .map(|outer| RateEstimate {
                rate: outer.success_rate,
                samples: outer.occurrence_count,
                layer: Layer::Outer,
            })
    }

    /// Learned parameter, with the same inner-first rule as `success_estimate`
    pub fn param_estimate(&self, source_id: &str, pattern: &Pattern) -> Option<f64> {
        if let Some(inner) = self.inner(source_id, pattern) {
            if inner.is_authoritative(self.config.min_samples) {
                if let Some(p) = inner.optimal_param_estimate {
                    return Some(p);
                }
            }
        }
        self.outer(pattern).and_then(|outer| outer.optimal_threshold)
    }

    pub fn source_view(&self, source_id: &str) -> Option<SourceView> {
        let ledger = self.ledgers.get(source_id).map(|l| Arc::clone(l.value()))?;
        let guard = ledger.lock().unwrap_or_else(PoisonError::into_inner);

        let mut inner: Vec<InnerRecord> = guard.inner.values().cloned().collect();
        inner.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        Some(SourceView {
            inner,
            strategies: guard
                .strategies
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        })
    }

    /// Global counters per strategy: the sum over sources
    pub fn global_counters(&self) -> BTreeMap<String, StrategyCounters> {
        let mut totals: BTreeMap<String, StrategyCounters> = BTreeMap::new();
        for ledger in self.ledger_handles() {
            let guard = ledger.lock().unwrap_or_else(PoisonError::into_inner);
            for (name, counters) in &guard.strategies {
                totals.entry(name.clone()).or_default().merge(counters);
            }
        }
        totals
    }

    pub fn strategy_rates(&self) -> Vec<StrategyRate> {
        self.global_counters()
            .iter()
            .map(|(name, c)| StrategyRate::from_counters(name, None, c))
            .collect()
    }

    pub fn source_strategy_rates(&self, source_id: &str) -> Vec<StrategyRate> {
        self.source_view(source_id)
            .map(|view| {
                view.strategies
                    .iter()
                    .map(|(name, c)| StrategyRate::from_counters(name, Some(source_id), c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Per-(source, error_type) totals across strategies
    pub fn source_rollup(&self) -> Vec<SourceRollup> {
        let mut acc: BTreeMap<(String, ErrorType), (u64, u64)> = BTreeMap::new();
        for record in self.all_inner() {
            let entry = acc
                .entry((record.source_id.clone(), record.pattern.error_type))
                .or_default();
            entry.0 += record.occurrence_count;
            entry.1 += record.success_count;
        }

        acc.into_iter()
            .map(|((source_id, error_type), (occurrences, successes))| SourceRollup {
                source_id,
                error_type,
                occurrence_count: occurrences,
                success_count: successes,
                success_rate: if occurrences == 0 {
                    0.0
                } else {
                    successes as f64 / occurrences as f64
                },
            })
            .collect()
    }

    fn ledger_handles(&self) -> Vec<Arc<Mutex<SourceLedger>>> {
        self.ledgers.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn all_inner(&self) -> Vec<InnerRecord> {
        self.ledger_handles()
            .iter()
            .flat_map(|ledger| {
                let guard = ledger.lock().unwrap_or_else(PoisonError::into_inner);
                guard.inner.values().cloned().collect::<Vec<_>>()
            })
            .collect()
    }

    /// Recompute the outer layer from the current inner records
    pub fn aggregate(&self) -> Arc<OuterSnapshot> {
        let now = Utc::now();
        let inner = self.all_inner();
        self.outcomes_since_aggregate.store(0, Ordering::SeqCst);

        let mut slot = self.outer.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Arc::new(OuterSnapshot {
            records: aggregate(&inner, now),
            computed_at: Some(now),
            generation: slot.generation + 1,
        });
        *slot = Arc::clone(&snapshot);
        snapshot
    }

    /// Recompute the outer layer periodically, or early once enough outcomes
    /// have accumulated, until cancelled
    pub async fn run_aggregator(self: Arc<Self>, mut token: ShutdownToken) {
        let mut interval = tokio::time::interval(self.config.aggregation_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        info!(
            "Learning aggregator started (every {:?} or {} outcomes)",
            self.config.aggregation_interval(),
            self.config.aggregate_every_outcomes
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
                _ = self.aggregate_due.notified() => {}
            }

            let snapshot = self.aggregate();
            debug!(
                "Outer layer generation {} ({} patterns)",
                snapshot.generation,
                snapshot.records.len()
            );
        }

        info!("Learning aggregator stopped");
    }
}
