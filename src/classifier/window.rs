//! Rolling error-rate windows and the per-endpoint status board

use crate::domain::{EndpointKey, EndpointStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Thresholds that turn a rolling error rate into an endpoint status
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusThresholds {
    /// Number of most recent checks in the rolling window
    pub window_size: usize,
    /// error_rate >= this is degraded
    pub degraded_rate: f64,
    /// error_rate >= this is critical
    pub critical_rate: f64,
    /// error_rate > this is failed
    pub failed_rate: f64,
    /// Consecutive failures that force at least critical
    pub critical_consecutive: u32,
    /// Consecutive failures that force failed
    pub failed_consecutive: u32,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            window_size: 50,
            degraded_rate: 0.02,
            critical_rate: 0.10,
            failed_rate: 0.25,
            critical_consecutive: 3,
            failed_consecutive: 5,
        }
    }
}

impl StatusThresholds {
    /// Status from the error rate alone
    pub fn status_for_rate(&self, error_rate: f64) -> EndpointStatus {
        if error_rate > self.failed_rate {
            EndpointStatus::Failed
        } else if error_rate >= self.critical_rate {
            EndpointStatus::Critical
        } else if error_rate >= self.degraded_rate {
            EndpointStatus::Degraded
        } else {
            EndpointStatus::Healthy
        }
    }

    /// Status from the error rate and the consecutive-failure count
    pub fn status_for(&self, error_rate: f64, consecutive_failures: u32) -> EndpointStatus {
        let by_run = if consecutive_failures >= self.failed_consecutive {
            EndpointStatus::Failed
        } else if consecutive_failures >= self.critical_consecutive {
            EndpointStatus::Critical
        } else {
            EndpointStatus::Healthy
        };
        self.status_for_rate(error_rate).max(by_run)
    }
}

/// Fixed-size window of recent check outcomes
#[derive(Debug, Clone)]
pub struct ErrorRateWindow {
    capacity: usize,
    outcomes: VecDeque<bool>,
    failures: usize,
    consecutive_failures: u32,
    total_checks: u64,
    last_checked: Option<DateTime<Utc>>,
}

impl ErrorRateWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            outcomes: VecDeque::with_capacity(capacity),
            failures: 0,
            consecutive_failures: 0,
            total_checks: 0,
            last_checked: None,
        }
    }

    /// Record one check outcome
    pub fn record(&mut self, failed: bool, at: DateTime<Utc>) {
        if self.outcomes.len() == self.capacity {
            if let Some(true) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        self.outcomes.push_back(failed);
        if failed {
            self.failures += 1;
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        self.total_checks += 1;
        self.last_checked = Some(at);
    }

    /// failed / total over the window; 0 when empty
    pub fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.failures as f64 / self.outcomes.len() as f64
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Snapshot of one endpoint's health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub source_id: String,
    pub endpoint_path: String,
    pub status: EndpointStatus,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Per-endpoint rolling windows, sharded for concurrent pollers
pub struct StatusBoard {
    thresholds: StatusThresholds,
    windows: DashMap<EndpointKey, ErrorRateWindow>,
}

impl StatusBoard {
    pub fn new(thresholds: StatusThresholds) -> Self {
        Self {
            thresholds,
            windows: DashMap::new(),
        }
    }

    pub fn thresholds(&self) -> &StatusThresholds {
        &self.thresholds
    }

    /// Record a classified check and return the updated status
    pub fn observe(&self, key: &EndpointKey, failed: bool, at: DateTime<Utc>) -> EndpointStatus {
        let mut window = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| ErrorRateWindow::new(self.thresholds.window_size));
        window.record(failed, at);
        self.thresholds
            .status_for(window.error_rate(), window.consecutive_failures())
    }

    pub fn status(&self, key: &EndpointKey) -> EndpointStatus {
        self.windows
            .get(key)
            .map(|w| {
                self.thresholds
                    .status_for(w.error_rate(), w.consecutive_failures())
            })
            .unwrap_or_default()
    }

    pub fn health(&self, key: &EndpointKey) -> Option<EndpointHealth> {
        self.windows.get(key).map(|w| self.to_health(key, &w))
    }

    /// All endpoints with at least one check, ordered by key
    pub fn snapshot(&self) -> Vec<EndpointHealth> {
        let mut list: Vec<_> = self
            .windows
            .iter()
            .map(|entry| self.to_health(entry.key(), entry.value()))
            .collect();
        list.sort_by(|a, b| {
            (&a.source_id, &a.endpoint_path).cmp(&(&b.source_id, &b.endpoint_path))
        });
        list
    }

    fn to_health(&self, key: &EndpointKey, window: &ErrorRateWindow) -> EndpointHealth {
        EndpointHealth {
            source_id: key.source_id.clone(),
            endpoint_path: key.endpoint_path.clone(),
            status: self
                .thresholds
                .status_for(window.error_rate(), window.consecutive_failures()),
            error_rate: window.error_rate(),
            consecutive_failures: window.consecutive_failures(),
            total_checks: window.total_checks,
            last_checked: window.last_checked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_boundaries() {
        let t = StatusThresholds::default();
        assert_eq!(t.status_for_rate(0.0), EndpointStatus::Healthy);
        assert_eq!(t.status_for_rate(0.019), EndpointStatus::Healthy);
        assert_eq!(t.status_for_rate(0.02), EndpointStatus::Degraded);
        assert_eq!(t.status_for_rate(0.099), EndpointStatus::Degraded);
        assert_eq!(t.status_for_rate(0.10), EndpointStatus::Critical);
        assert_eq!(t.status_for_rate(0.25), EndpointStatus::Critical);
        assert_eq!(t.status_for_rate(0.26), EndpointStatus::Failed);
    }

    #[test]
    fn test_consecutive_failures_raise_status() {
        let t = StatusThresholds::default();
        assert_eq!(t.status_for(0.0, 3), EndpointStatus::Critical);
        assert_eq!(t.status_for(0.0, 5), EndpointStatus::Failed);
        assert_eq!(t.status_for(0.3, 0), EndpointStatus::Failed);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let now = Utc::now();
        let mut window = ErrorRateWindow::new(4);
        window.record(true, now);
        window.record(false, now);
        window.record(false, now);
        window.record(false, now);
        assert_eq!(window.error_rate(), 0.25);

        window.record(false, now);
        assert_eq!(window.error_rate(), 0.0);
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn test_consecutive_failures_reset_on_success() {
        let now = Utc::now();
        let mut window = ErrorRateWindow::new(10);
        window.record(true, now);
        window.record(true, now);
        assert_eq!(window.consecutive_failures(), 2);

        window.record(false, now);
        assert_eq!(window.consecutive_failures(), 0);
    }

    #[test]
    fn test_status_board_tracks_endpoints_independently() {
        let board = StatusBoard::new(StatusThresholds::default());
        let a = EndpointKey::new("alpha", "/quote");
        let b = EndpointKey::new("beta", "/quote");
        let now = Utc::now();

        for _ in 0..20 {
            board.observe(&a, false, now);
        }
        let status = board.observe(&b, true, now);

        assert_eq!(board.status(&a), EndpointStatus::Healthy);
        assert_eq!(status, EndpointStatus::Failed);
        assert_eq!(board.snapshot().len(), 2);
        assert_eq!(board.health(&b).unwrap().consecutive_failures, 1);
    }
}
