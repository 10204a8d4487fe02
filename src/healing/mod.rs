//! Healing Strategy Catalog & Selector
//!
//! - `catalog`: declared strategies (built-in or configured)
//! - `selector`: deterministic ranking against learned success rates
//! - `executor`: carries out strategy actions
//! - `engine`: per-event state machine with a bounded attempt budget
//! - `fallback`: alternate source chains

pub mod catalog;
pub mod engine;
pub mod executor;
pub mod fallback;
pub mod selector;
pub mod strategy;

pub use catalog::StrategyCatalog;
pub use engine::{AttemptRecord, HealingConfig, HealingEngine, HealingOutcome, HealingReport};
pub use executor::{ActionExecutor, ActionOutcome, BackoffConfig, HealingContext, StrategyExecutor};
pub use fallback::{FallbackChain, FallbackChainConfig, FallbackResolver};
pub use selector::{rank_with, RankedStrategy, StrategySelector};
pub use strategy::{HealingStrategy, StrategyAction, StrategyScope};
