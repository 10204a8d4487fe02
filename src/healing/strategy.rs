use crate::domain::{ErrorEvent, ErrorType};
use crate::learning::StrategyCounters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which sources a strategy may be applied to
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StrategyScope {
    /// Any source
    #[default]
    General,
    /// Only the named source
    Source(String),
}

impl StrategyScope {
    pub fn matches(&self, source_id: &str) -> bool {
        match self {
            StrategyScope::General => true,
            StrategyScope::Source(id) => id == source_id,
        }
    }
}

impl fmt::Display for StrategyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyScope::General => write!(f, "general"),
            StrategyScope::Source(id) => write!(f, "source:{}", id),
        }
    }
}

impl TryFrom<&str> for StrategyScope {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.eq_ignore_ascii_case("general") {
            return Ok(StrategyScope::General);
        }
        match s.split_once(':') {
            Some((kind, id)) if kind.eq_ignore_ascii_case("source") && !id.is_empty() => {
                Ok(StrategyScope::Source(id.to_string()))
            }
            _ => Err(format!("Unknown strategy scope: {}", s)),
        }
    }
}

impl TryFrom<String> for StrategyScope {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        StrategyScope::try_from(s.as_str())
    }
}

impl From<StrategyScope> for String {
    fn from(scope: StrategyScope) -> Self {
        scope.to_string()
    }
}

/// What a strategy does when applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyAction {
    /// Probe the endpoint again
    Reprobe,
    /// Probe again after exponentially growing delays
    RetryWithBackoff {
        #[serde(default = "default_retries")]
        retries: u32,
    },
    /// Probe again with a longer timeout
    ExtendTimeout,
    /// Serve the last-known-good payload from the cache
    ServeCached,
    /// Switch to an alternate source from the fallback chain
    SourceFallback,
}

fn default_retries() -> u32 {
    2
}

impl StrategyAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyAction::Reprobe => "reprobe",
            StrategyAction::RetryWithBackoff { .. } => "retry_with_backoff",
            StrategyAction::ExtendTimeout => "extend_timeout",
            StrategyAction::ServeCached => "serve_cached",
            StrategyAction::SourceFallback => "source_fallback",
        }
    }
}

/// A recovery action and the failures it applies to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingStrategy {
    pub name: String,
    #[serde(default)]
    pub scope: StrategyScope,
    pub applicable_error_types: BTreeSet<ErrorType>,
    /// Lower is tried first
    pub priority: u32,
    pub action: StrategyAction,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub fail_count: u64,
}

impl HealingStrategy {
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        action: StrategyAction,
        error_types: impl IntoIterator<Item = ErrorType>,
    ) -> Self {
        Self {
            name: name.into(),
            scope: StrategyScope::General,
            applicable_error_types: error_types.into_iter().collect(),
            priority,
            action,
            success_count: 0,
            fail_count: 0,
        }
    }

    pub fn with_scope(mut self, scope: StrategyScope) -> Self {
        self.scope = scope;
        self
    }

    /// Error type and scope both match
    pub fn applies_to(&self, event: &ErrorEvent) -> bool {
        self.applicable_error_types.contains(&event.error_type) && self.scope.matches(&event.source_id)
    }

    /// Recomputed from the counts on every read
    pub fn success_rate(&self) -> f64 {
        self.counters().success_rate()
    }

    pub fn counters(&self) -> StrategyCounters {
        StrategyCounters {
            success_count: self.success_count,
            fail_count: self.fail_count,
        }
    }

    pub fn with_counters(mut self, counters: StrategyCounters) -> Self {
        self.success_count = counters.success_count;
        self.fail_count = counters.fail_count;
        self
    }
}
