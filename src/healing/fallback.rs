//! Fallback Chain Resolver
//!
//! Chains come from configuration and do not change at runtime. Switch times
//! are tracked for reporting only.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

/// Smoothing factor for the switch-time average
const SWITCH_EMA_ALPHA: f64 = 0.3;

/// Configured chain: primary source and its ordered alternates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackChainConfig {
    pub primary: String,
    pub alternates: Vec<String>,
}

/// Chain with its observed switch time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackChain {
    pub primary: String,
    pub alternates: Vec<String>,
    pub switches: u64,
    pub avg_switch_ms: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct SwitchStats {
    switches: u64,
    avg_ms: Option<f64>,
}

pub struct FallbackResolver {
    chains: HashMap<String, Vec<String>>,
    stats: DashMap<String, SwitchStats>,
}

impl FallbackResolver {
    pub fn new(configs: &[FallbackChainConfig]) -> Self {
        let chains = configs
            .iter()
            .map(|c| {
                let alternates = c
                    .alternates
                    .iter()
                    .filter(|a| **a != c.primary)
                    .cloned()
                    .collect();
                (c.primary.clone(), alternates)
            })
            .collect();

        Self {
            chains,
            stats: DashMap::new(),
        }
    }

    /// First alternate of `source_id` not yet in `tried`
    pub fn next_alternate(&self, source_id: &str, tried: &HashSet<String>) -> Option<String> {
        self.chains
            .get(source_id)?
            .iter()
            .find(|alt| !tried.contains(*alt))
            .cloned()
    }

    pub fn has_chain(&self, source_id: &str) -> bool {
        self.chains
            .get(source_id)
            .map_or(false, |alts| !alts.is_empty())
    }

    /// Fold a completed switch into the moving average
    pub fn record_switch(&self, primary: &str, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut stats = self.stats.entry(primary.to_string()).or_default();
        stats.switches += 1;
        stats.avg_ms = Some(match stats.avg_ms {
            Some(prev) => SWITCH_EMA_ALPHA * ms + (1.0 - SWITCH_EMA_ALPHA) * prev,
            None => ms,
        });
        debug!("Fallback switch for {} took {:.1}ms", primary, ms);
    }

    pub fn avg_switch_time(&self, primary: &str) -> Option<Duration> {
        self.stats
            .get(primary)
            .and_then(|s| s.avg_ms)
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    pub fn chains(&self) -> Vec<FallbackChain> {
        let mut list: Vec<_> = self
            .chains
            .iter()
            .map(|(primary, alternates)| {
                let stats = self.stats.get(primary).map(|s| *s).unwrap_or_default();
                FallbackChain {
                    primary: primary.clone(),
                    alternates: alternates.clone(),
                    switches: stats.switches,
                    avg_switch_ms: stats.avg_ms,
                }
            })
            .collect();
        list.sort_by(|a, b| a.primary.cmp(&b.primary));
        list
    }
}
