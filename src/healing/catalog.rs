use super::strategy::{HealingStrategy, StrategyAction};
use crate::domain::ErrorType;
use crate::error::{Result, VigilError};
use crate::learning::LearningStore;
use std::collections::HashSet;

/// Ordered set of healing strategies. Declared data only; selection works
/// purely over what each entry declares.
#[derive(Debug, Clone)]
pub struct StrategyCatalog {
    strategies: Vec<HealingStrategy>,
}

impl Default for StrategyCatalog {
    fn default() -> Self {
        use ErrorType::*;

        Self {
            strategies: vec![
                HealingStrategy::new(
                    "exponential_backoff_retry",
                    1,
                    StrategyAction::RetryWithBackoff { retries: 2 },
                    [RateLimit, Timeout, ServerError, NetworkError],
                ),
                HealingStrategy::new(
                    "extended_timeout_retry",
                    2,
                    StrategyAction::ExtendTimeout,
                    [Timeout],
                ),
                HealingStrategy::new(
                    "cache_fallback",
                    3,
                    StrategyAction::ServeCached,
                    [
                        Timeout,
                        RateLimit,
                        AuthError,
                        ServerError,
                        InvalidData,
                        StaleData,
                        NetworkError,
                    ],
                ),
                HealingStrategy::new(
                    "source_fallback",
                    4,
                    StrategyAction::SourceFallback,
                    [
                        Timeout,
                        AuthError,
                        ServerError,
                        InvalidData,
                        StaleData,
                        NetworkError,
                    ],
                ),
                HealingStrategy::new(
                    "reprobe",
                    5,
                    StrategyAction::Reprobe,
                    [InvalidData, StaleData, Unknown],
                ),
            ],
        }
    }
}

impl StrategyCatalog {
    /// Build a catalog from declared strategies, rejecting duplicates and
    /// entries that apply to nothing
    pub fn new(strategies: Vec<HealingStrategy>) -> Result<Self> {
        let mut names = HashSet::new();
        for strategy in &strategies {
            if strategy.name.trim().is_empty() {
                return Err(VigilError::Validation("strategy name is empty".into()));
            }
            if !names.insert(strategy.name.as_str()) {
                return Err(VigilError::Validation(format!(
                    "duplicate strategy: {}",
                    strategy.name
                )));
            }
            if strategy.applicable_error_types.is_empty() {
                return Err(VigilError::Validation(format!(
                    "strategy {} applies to no error types",
                    strategy.name
                )));
            }
        }
        Ok(Self { strategies })
    }

    /// Configured strategies replace the built-in catalog when present
    pub fn from_config(configured: &[HealingStrategy]) -> Result<Self> {
        if configured.is_empty() {
            Ok(Self::default())
        } else {
            Self::new(configured.to_vec())
        }
    }

    pub fn strategies(&self) -> &[HealingStrategy] {
        &self.strategies
    }

    pub fn get(&self, name: &str) -> Option<&HealingStrategy> {
        self.strategies.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Strategy with its global counters filled in from the learning store
    pub fn snapshot_of(&self, name: &str, learning: &LearningStore) -> Option<HealingStrategy> {
        let counters = learning.global_counters().remove(name).unwrap_or_default();
        self.get(name).cloned().map(|s| s.with_counters(counters))
    }

    /// Every strategy with its global counters
    pub fn snapshot(&self, learning: &LearningStore) -> Vec<HealingStrategy> {
        let counters = learning.global_counters();
        self.strategies
            .iter()
            .map(|s| {
                let c = counters.get(&s.name).copied().unwrap_or_default();
                s.clone().with_counters(c)
            })
            .collect()
    }
}
