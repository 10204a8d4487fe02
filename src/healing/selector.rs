//! Strategy ranking
//!
//! Candidates are ordered by declared priority. Ties go to the higher learned
//! success rate (inner layer when authoritative, outer prior otherwise), then
//! to catalog order. The same event and statistics always give the same order.

use super::strategy::HealingStrategy;
use crate::domain::ErrorEvent;
use crate::learning::{LearningStore, Pattern, RateEstimate};
use std::cmp::Ordering;
use std::sync::Arc;

/// A candidate with the estimate it was ranked by
#[derive(Debug, Clone)]
pub struct RankedStrategy {
    pub strategy: HealingStrategy,
    pub estimate: Option<RateEstimate>,
}

pub struct StrategySelector {
    learning: Arc<LearningStore>,
}

impl StrategySelector {
    pub fn new(learning: Arc<LearningStore>) -> Self {
        Self { learning }
    }

    /// Applicable strategies, best first
    pub fn rank(&self, event: &ErrorEvent, catalog: &[HealingStrategy]) -> Vec<RankedStrategy> {
        rank_with(event, catalog, |pattern| {
            self.learning.success_estimate(&event.source_id, pattern)
        })
    }
}

/// Rank against an arbitrary estimate lookup
pub fn rank_with(
    event: &ErrorEvent,
    catalog: &[HealingStrategy],
    estimate: impl Fn(&Pattern) -> Option<RateEstimate>,
) -> Vec<RankedStrategy> {
    let mut candidates: Vec<(usize, RankedStrategy)> = catalog
        .iter()
        .enumerate()
        .filter(|(_, s)| s.applies_to(event))
        .map(|(index, s)| {
            let pattern = Pattern::new(event.error_type, &s.name);
            (
                index,
                RankedStrategy {
                    strategy: s.clone(),
                    estimate: estimate(&pattern),
                },
            )
        })
        .collect();

    candidates.sort_by(|(ia, a), (ib, b)| {
        a.strategy
            .priority
            .cmp(&b.strategy.priority)
            .then_with(|| compare_estimates(a.estimate.as_ref(), b.estimate.as_ref()))
            .then_with(|| ia.cmp(ib))
    });

    candidates.into_iter().map(|(_, ranked)| ranked).collect()
}

/// Higher rate first; a known rate beats no data
fn compare_estimates(a: Option<&RateEstimate>, b: Option<&RateEstimate>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.rate.total_cmp(&a.rate),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorType;
    use crate::healing::{StrategyAction, StrategyCatalog};
    use crate::learning::{Layer, LearningConfig};
    use chrono::Utc;

    fn event(source: &str, error_type: ErrorType) -> ErrorEvent {
        ErrorEvent::new(Utc::now(), source, "/quote", error_type)
    }

    fn tied_catalog() -> Vec<HealingStrategy> {
        vec![
            HealingStrategy::new("first", 1, StrategyAction::Reprobe, [ErrorType::Timeout]),
            HealingStrategy::new("second", 1, StrategyAction::Reprobe, [ErrorType::Timeout]),
            HealingStrategy::new("later", 2, StrategyAction::Reprobe, [ErrorType::Timeout]),
            HealingStrategy::new("other", 0, StrategyAction::Reprobe, [ErrorType::RateLimit]),
        ]
    }

    fn names(ranked: &[RankedStrategy]) -> Vec<&str> {
        ranked.iter().map(|r| r.strategy.name.as_str()).collect()
    }

    #[test]
    fn test_filters_and_orders_by_priority() {
        let catalog = StrategyCatalog::default();
        let ranked = rank_with(&event("x", ErrorType::Timeout), catalog.strategies(), |_| None);
        assert_eq!(
            names(&ranked),
            vec![
                "exponential_backoff_retry",
                "extended_timeout_retry",
                "cache_fallback",
                "source_fallback"
            ]
        );
    }

    #[test]
    fn test_ties_broken_by_learned_rate() {
        let ranked = rank_with(&event("x", ErrorType::Timeout), &tied_catalog(), |p| {
            (p.strategy == "second").then_some(RateEstimate {
                rate: 0.9,
                samples: 12,
                layer: Layer::Inner,
            })
        });
        assert_eq!(names(&ranked), vec!["second", "first", "later"]);
    }

    #[test]
    fn test_ties_without_data_keep_catalog_order() {
        let ranked = rank_with(&event("x", ErrorType::Timeout), &tied_catalog(), |_| None);
        assert_eq!(names(&ranked), vec!["first", "second", "later"]);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let learning = Arc::new(LearningStore::new(LearningConfig::default()));
        for i in 0..12 {
            learning.record_attempt("x", ErrorType::Timeout, "first", i % 3 == 0, None);
            learning.record_attempt("x", ErrorType::Timeout, "second", i % 2 == 0, None);
        }
        let selector = StrategySelector::new(learning);
        let e = event("x", ErrorType::Timeout);

        let a = names(&selector.rank(&e, &tied_catalog()))
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let b = names(&selector.rank(&e, &tied_catalog()))
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        assert_eq!(a, b);
        assert_eq!(a, vec!["second", "first", "later"]);
    }

    #[test]
    fn test_outer_prior_used_below_min_samples() {
        let learning = Arc::new(LearningStore::new(LearningConfig::default()));
        for _ in 0..20 {
            learning.record_attempt("x", ErrorType::Timeout, "second", true, None);
            learning.record_attempt("x", ErrorType::Timeout, "first", false, None);
        }
        learning.aggregate();
        // y has a perfect but tiny inner record for "first"
        for _ in 0..3 {
            learning.record_attempt("y", ErrorType::Timeout, "first", true, None);
        }

        let selector = StrategySelector::new(learning);
        let ranked = selector.rank(&event("y", ErrorType::Timeout), &tied_catalog());
        assert_eq!(names(&ranked), vec!["second", "first", "later"]);
        assert_eq!(ranked[0].estimate.unwrap().layer, Layer::Outer);
        assert_eq!(ranked[1].estimate.unwrap().rate, 0.0);
    }
}
