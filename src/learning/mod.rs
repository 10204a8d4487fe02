//! Hierarchical Learning Store
//!
//! Two layers with two cadences:
//! - inner: per source, updated synchronously after every healing attempt
//! - outer: cross-source priors, recomputed periodically from the inner layer
//!
//! Readers go inner-first and fall back to outer until the inner record has
//! enough samples.

pub mod records;
pub mod store;

pub use records::{aggregate, InnerRecord, OuterRecord, Pattern, StrategyCounters};
pub use store::{
    Layer, LearningConfig, LearningStore, OuterSnapshot, RateEstimate, SourceRollup, SourceView,
    StrategyRate,
};
