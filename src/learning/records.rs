//! Learning records for the two layers
//!
//! Inner records are per source and updated after every healing attempt. Outer
//! records are derived: `aggregate` is a pure function of the inner records.

use crate::domain::ErrorType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What was learned about: an error type healed by a named strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pattern {
    pub error_type: ErrorType,
    pub strategy: String,
}

impl Pattern {
    pub fn new(error_type: ErrorType, strategy: impl Into<String>) -> Self {
        Self {
            error_type,
            strategy: strategy.into(),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.error_type, self.strategy)
    }
}

/// Success/failure counters for one strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyCounters {
    pub success_count: u64,
    pub fail_count: u64,
}

impl StrategyCounters {
    pub fn record(&mut self, success: bool) {
        if success {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.success_count + self.fail_count
    }

    /// success / (success + fail); 0 before any outcome
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.success_count as f64 / total as f64,
        }
    }

    pub fn merge(&mut self, other: &StrategyCounters) {
        self.success_count += other.success_count;
        self.fail_count += other.fail_count;
    }
}

/// Fast, per-source knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerRecord {
    pub source_id: String,
    pub pattern: Pattern,
    pub occurrence_count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    /// EMA of the parameter (delay, timeout) used by successful attempts
    pub optimal_param_estimate: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

impl InnerRecord {
    pub fn new(source_id: impl Into<String>, pattern: Pattern, now: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            pattern,
            occurrence_count: 0,
            success_count: 0,
            success_rate: 0.0,
            optimal_param_estimate: None,
            last_updated: now,
        }
    }

    /// Fold one attempt into the record without retaining the sample
    pub fn record(&mut self, success: bool, param: Option<f64>, alpha: f64, now: DateTime<Utc>) {
        self.occurrence_count += 1;
        if success {
            self.success_count += 1;
            if let Some(p) = param {
                self.optimal_param_estimate = Some(match self.optimal_param_estimate {
                    Some(prev) => alpha * p + (1.0 - alpha) * prev,
                    None => p,
                });
            }
        }
        self.success_rate = self.success_count as f64 / self.occurrence_count as f64;
        self.last_updated = now;
    }

    /// Enough samples to trust over the cross-source prior
    pub fn is_authoritative(&self, min_samples: u64) -> bool {
        self.occurrence_count >= min_samples
    }
}

/// Slow, cross-source knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OuterRecord {
    pub pattern_type: Pattern,
    pub occurrence_count: u64,
    pub success_rate: f64,
    pub optimal_threshold: Option<f64>,
    pub source_count: usize,
    pub last_updated: DateTime<Utc>,
}

/// Recompute the outer layer: per pattern, occurrence-weighted averages of the
/// inner records across all sources
pub fn aggregate<'a>(
    inner: impl IntoIterator<Item = &'a InnerRecord>,
    now: DateTime<Utc>,
) -> HashMap<Pattern, OuterRecord> {
    #[derive(Default)]
    struct Acc {
        occurrences: u64,
        weighted_rate: f64,
        param_weight: u64,
        weighted_param: f64,
        sources: usize,
    }

    let mut acc: HashMap<Pattern, Acc> = HashMap::new();
    for record in inner {
        if record.occurrence_count == 0 {
            continue;
        }
        let entry = acc.entry(record.pattern.clone()).or_default();
        let weight = record.occurrence_count;
        entry.occurrences += weight;
        entry.weighted_rate += record.success_rate * weight as f64;
        if let Some(p) = record.optimal_param_estimate {
            entry.param_weight += weight;
            entry.weighted_param += p * weight as f64;
        }
        entry.sources += 1;
    }

    acc.into_iter()
        .map(|(pattern, a)| {
            let record = OuterRecord {
                pattern_type: pattern.clone(),
                occurrence_count: a.occurrences,
                success_rate: a.weighted_rate / a.occurrences as f64,
                optimal_threshold: (a.param_weight > 0)
                    .then(|| a.weighted_param / a.param_weight as f64),
                source_count: a.sources,
                last_updated: now,
            };
            (pattern, record)
        })
        .collect()
}
