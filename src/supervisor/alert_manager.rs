//! Alert Manager
//!
//! One alert per failure fingerprint (source + endpoint + error type). Repeated
//! unresolved events are folded into the existing alert and rate limited by a
//! cooldown. An escalation becomes due when the consecutive failure count
//! reaches the threshold. The alert only turns `Escalated` once the collaborator
//! has the handoff; an undelivered escalation is retried on the next failure.
//! Alerts heal on a resolved event or a healthy poll.

use crate::domain::{EndpointKey, ErrorCategory, ErrorEvent, ErrorType, Fingerprint, Priority};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Informational - log only
    Info,
    /// Warning - degraded but self-healing
    Warning,
    /// Error - healing is not keeping up
    Error,
    /// Critical - escalated or critical endpoint down
    Critical,
}

impl AlertLevel {
    /// Get emoji prefix for alert level
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "\u{2139}\u{fe0f}",    // info icon
            AlertLevel::Warning => "\u{26a0}\u{fe0f}", // warning icon
            AlertLevel::Error => "\u{274c}",           // red X
            AlertLevel::Critical => "\u{1f6a8}",       // police light
        }
    }

    /// Get severity string
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }

    fn raised(self) -> Self {
        match self {
            AlertLevel::Info => AlertLevel::Warning,
            AlertLevel::Warning => AlertLevel::Error,
            _ => AlertLevel::Critical,
        }
    }

    fn lowered(self) -> Self {
        match self {
            AlertLevel::Critical => AlertLevel::Error,
            AlertLevel::Error => AlertLevel::Warning,
            _ => AlertLevel::Info,
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Healed,
    Escalated,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Healed => "healed",
            AlertStatus::Escalated => "escalated",
        }
    }

    /// Open or escalated
    pub fn is_active(&self) -> bool {
        !matches!(self, AlertStatus::Healed)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of the handoff to the escalation collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationProgress {
    #[default]
    Idle,
    /// An attempt was handed out and has not been reported back
    InFlight,
    /// The last attempt was not delivered; the next failure tries again
    Retry,
}

/// Alert record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    pub level: AlertLevel,
    pub status: AlertStatus,
    pub priority: Priority,
    pub consecutive_failures: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_notified: DateTime<Utc>,
    /// Failures folded in without a notification
    pub suppressed_count: u32,
    pub escalation: EscalationProgress,
}

impl Alert {
    fn open(fingerprint: Fingerprint, priority: Priority, at: DateTime<Utc>) -> Self {
        let level = level_for(fingerprint.error_type, priority, AlertStatus::Open);
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            level,
            status: AlertStatus::Open,
            priority,
            consecutive_failures: 1,
            first_seen: at,
            last_seen: at,
            last_notified: at,
            suppressed_count: 0,
            escalation: EscalationProgress::Idle,
        }
    }

    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] {} {} after {} consecutive failures (since {})",
            self.level.emoji(),
            self.level,
            self.fingerprint,
            self.status,
            self.consecutive_failures,
            self.first_seen.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

/// Severity from error type and endpoint priority
///
/// Unknown errors stay at warning. Escalated alerts are always critical.
pub fn level_for(error_type: ErrorType, priority: Priority, status: AlertStatus) -> AlertLevel {
    if status == AlertStatus::Escalated {
        return AlertLevel::Critical;
    }
    let base = match error_type.category() {
        ErrorCategory::Unknown => return AlertLevel::Warning,
        ErrorCategory::Transport | ErrorCategory::DataQuality => AlertLevel::Warning,
        ErrorCategory::Protocol => match error_type {
            ErrorType::RateLimit => AlertLevel::Warning,
            _ => AlertLevel::Error,
        },
    };
    match priority {
        Priority::Critical => base.raised(),
        Priority::Low => base.lowered(),
        Priority::High | Priority::Medium => base,
    }
}

/// Configuration for alert manager
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertManagerConfig {
    /// Consecutive unresolved failures before escalation (default: 5)
    pub escalation_threshold: u32,
    /// Minimum interval between notifications for one fingerprint (default: 60s)
    pub cooldown_secs: u64,
    /// Recent events kept per fingerprint for escalation context (default: 10)
    pub history_len: usize,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 5,
            cooldown_secs: 60,
            history_len: 10,
        }
    }
}

impl AlertManagerConfig {
    pub fn cooldown(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.cooldown_secs as i64)
    }
}

/// Published on every alert status change
#[derive(Debug, Clone, PartialEq)]
pub struct AlertTransition {
    pub alert: Alert,
    pub from: Option<AlertStatus>,
    pub to: AlertStatus,
}

/// Result of folding one event into the alert table
#[derive(Debug, Clone, PartialEq)]
pub struct AlertUpdate {
    pub alert: Alert,
    /// A new alert was opened
    pub created: bool,
    /// First event in this cooldown window
    pub notify: bool,
    /// An escalation attempt is due. Report its result with
    /// [`AlertManager::complete_escalation`].
    pub escalate: bool,
}

/// Alert Manager
pub struct AlertManager {
    config: AlertManagerConfig,
    alerts: DashMap<Fingerprint, Alert>,
    history: DashMap<Fingerprint, VecDeque<ErrorEvent>>,
    event_tx: broadcast::Sender<AlertTransition>,
}

impl AlertManager {
    /// Create a new alert manager
    pub fn new(config: AlertManagerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            config,
            alerts: DashMap::new(),
            history: DashMap::new(),
            event_tx,
        }
    }

    pub fn config(&self) -> &AlertManagerConfig {
        &self.config
    }

    /// Subscribe to alert transitions
    pub fn subscribe(&self) -> broadcast::Receiver<AlertTransition> {
        self.event_tx.subscribe()
    }

    /// Fold an event (after healing) into its fingerprint's alert
    ///
    /// Returns `None` for a resolved event with no active alert.
    pub fn evaluate(&self, event: &ErrorEvent, priority: Priority) -> Option<AlertUpdate> {
        let fingerprint = event.fingerprint();
        self.remember(&fingerprint, event);

        if event.resolved {
            return self.heal(&fingerprint, event.timestamp).map(|alert| AlertUpdate {
                alert,
                created: false,
                notify: true,
                escalate: false,
            });
        }

        let at = event.timestamp;
        let threshold = self.config.escalation_threshold;
        let cooldown = self.config.cooldown();

        // The entry guard holds the shard lock, so counting and the threshold
        // check cannot interleave with another event for this fingerprint.
        let (update, from) = match self.alerts.entry(fingerprint.clone()) {
            Entry::Occupied(mut occupied) if occupied.get().status.is_active() => {
                let alert = occupied.get_mut();
                let from = alert.status;
                alert.consecutive_failures += 1;
                alert.last_seen = alert.last_seen.max(at);

                let notify = from == AlertStatus::Open && at - alert.last_notified >= cooldown;
                if notify {
                    alert.last_notified = at;
                } else {
                    alert.suppressed_count += 1;
                }

                let escalate = from == AlertStatus::Open
                    && match alert.escalation {
                        EscalationProgress::Idle => alert.consecutive_failures == threshold,
                        EscalationProgress::Retry => true,
                        EscalationProgress::InFlight => false,
                    };
                if escalate {
                    alert.escalation = EscalationProgress::InFlight;
                }
                alert.level = level_for(fingerprint.error_type, alert.priority, alert.status);

                let update = AlertUpdate {
                    alert: alert.clone(),
                    created: false,
                    notify,
                    escalate,
                };
                (update, Some(from))
            }
            entry => {
                let mut alert = Alert::open(fingerprint.clone(), priority, at);
                let escalate = threshold <= 1;
                if escalate {
                    alert.escalation = EscalationProgress::InFlight;
                }
                let update = AlertUpdate {
                    alert: alert.clone(),
                    created: true,
                    notify: true,
                    escalate,
                };
                match entry {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(alert);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(alert);
                    }
                }
                (update, None)
            }
        };

        let alert = &update.alert;
        if update.escalate {
            error!(
                "{} Alert {} due for escalation after {} consecutive failures",
                alert.level.emoji(),
                alert.fingerprint,
                alert.consecutive_failures
            );
        } else if update.notify {
            match alert.level {
                AlertLevel::Info => info!("{}", alert.summary()),
                AlertLevel::Warning => warn!("{}", alert.summary()),
                AlertLevel::Error | AlertLevel::Critical => error!("{}", alert.summary()),
            }
        } else {
            debug!(
                "Alert {} suppressed (failures: {}, suppressed: {})",
                alert.fingerprint, alert.consecutive_failures, alert.suppressed_count
            );
        }

        if from != Some(alert.status) {
            self.publish(alert.clone(), from);
        }

        Some(update)
    }

    /// Report the result of an escalation attempt handed out by `evaluate`
    ///
    /// Delivered attempts move the alert to `Escalated`. Anything else leaves it
    /// open for a retry on its next failure. Returns `None` when the alert healed
    /// or was replaced while the attempt was in flight.
    pub fn complete_escalation(&self, alert: &Alert, delivered: bool) -> Option<Alert> {
        let (current, from) = {
            let mut current = self.alerts.get_mut(&alert.fingerprint)?;
            if current.id != alert.id || current.escalation != EscalationProgress::InFlight {
                return None;
            }
            let from = current.status;
            if delivered {
                current.status = AlertStatus::Escalated;
                current.escalation = EscalationProgress::Idle;
                current.level =
                    level_for(current.fingerprint.error_type, current.priority, current.status);
            } else {
                current.escalation = EscalationProgress::Retry;
            }
            (current.clone(), from)
        };

        if delivered {
            error!(
                "{} Alert {} escalated after {} consecutive failures",
                current.level.emoji(),
                current.fingerprint,
                current.consecutive_failures
            );
            self.publish(current.clone(), Some(from));
        } else {
            warn!(
                "Escalation of {} not delivered, retrying on next failure",
                current.fingerprint
            );
        }
        Some(current)
    }

    /// Heal every active alert on an endpoint after a healthy poll
    pub fn endpoint_recovered(&self, key: &EndpointKey, at: DateTime<Utc>) -> Vec<Alert> {
        let fingerprints: Vec<Fingerprint> = self
            .alerts
            .iter()
            .filter(|a| a.status.is_active() && a.fingerprint.endpoint_key() == *key)
            .map(|a| a.key().clone())
            .collect();

        fingerprints
            .iter()
            .filter_map(|fp| self.heal(fp, at))
            .collect()
    }

    fn heal(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Option<Alert> {
        let (alert, from) = {
            let mut alert = self.alerts.get_mut(fingerprint)?;
            if !alert.status.is_active() {
                return None;
            }
            let from = alert.status;
            alert.status = AlertStatus::Healed;
            alert.escalation = EscalationProgress::Idle;
            alert.consecutive_failures = 0;
            alert.last_seen = alert.last_seen.max(at);
            alert.level = AlertLevel::Info;
            (alert.clone(), from)
        };

        info!("{} Alert {} healed (was {})", alert.level.emoji(), fingerprint, from);
        self.publish(alert.clone(), Some(from));
        Some(alert)
    }

    fn remember(&self, fingerprint: &Fingerprint, event: &ErrorEvent) {
        let limit = self.config.history_len.max(1);
        let mut history = self.history.entry(fingerprint.clone()).or_default();
        history.push_back(event.clone());
        while history.len() > limit {
            history.pop_front();
        }
    }

    fn publish(&self, alert: Alert, from: Option<AlertStatus>) {
        let to = alert.status;
        // No subscribers is fine
        let _ = self.event_tx.send(AlertTransition { alert, from, to });
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Alert> {
        self.alerts.get(fingerprint).map(|a| a.clone())
    }

    /// Last K events for a fingerprint, oldest first
    pub fn history(&self, fingerprint: &Fingerprint) -> Vec<ErrorEvent> {
        self.history
            .get(fingerprint)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Open and escalated alerts, most severe first
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| a.status.is_active())
            .map(|a| a.clone())
            .collect();
        alerts.sort_by(|a, b| {
            b.level
                .cmp(&a.level)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        alerts
    }

    pub fn active_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.status.is_active()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_772_000_000 + secs, 0).unwrap()
    }

    fn failure(secs: i64) -> ErrorEvent {
        ErrorEvent::new(at(secs), "Y", "/series", ErrorType::Timeout)
    }

    fn manager() -> AlertManager {
        AlertManager::new(AlertManagerConfig::default())
    }

    #[test]
    fn test_alert_level_ordering() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Error);
        assert!(AlertLevel::Error < AlertLevel::Critical);
    }

    #[test]
    fn test_level_for() {
        assert_eq!(
            level_for(ErrorType::Unknown, Priority::Critical, AlertStatus::Open),
            AlertLevel::Warning
        );
        assert_eq!(
            level_for(ErrorType::AuthError, Priority::Medium, AlertStatus::Open),
            AlertLevel::Error
        );
        assert_eq!(
            level_for(ErrorType::Timeout, Priority::Critical, AlertStatus::Open),
            AlertLevel::Error
        );
        assert_eq!(
            level_for(ErrorType::StaleData, Priority::Low, AlertStatus::Open),
            AlertLevel::Info
        );
        assert_eq!(
            level_for(ErrorType::StaleData, Priority::Low, AlertStatus::Escalated),
            AlertLevel::Critical
        );
    }

    #[test]
    fn test_dedup_and_single_escalation() {
        let manager = manager();
        let updates: Vec<AlertUpdate> = (0..5)
            .map(|i| manager.evaluate(&failure(i), Priority::Medium).unwrap())
            .collect();

        assert!(updates[0].created);
        assert!(updates.iter().skip(1).all(|u| !u.created && !u.notify));
        assert_eq!(
            updates.iter().filter(|u| u.escalate).count(),
            1,
            "escalates once"
        );
        assert!(updates[4].escalate);
        assert_eq!(updates[4].alert.status, AlertStatus::Open);
        assert_eq!(updates[4].alert.escalation, EscalationProgress::InFlight);

        let escalated = manager.complete_escalation(&updates[4].alert, true).unwrap();
        assert_eq!(escalated.status, AlertStatus::Escalated);
        assert_eq!(escalated.level, AlertLevel::Critical);

        let alert = manager.get(&failure(0).fingerprint()).unwrap();
        assert_eq!(alert.consecutive_failures, 5);
        assert_eq!(alert.status, AlertStatus::Escalated);
        assert_eq!(alert.suppressed_count, 4);
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn test_escalated_alert_absorbs_failures() {
        let manager = manager();
        for i in 0..8 {
            let update = manager.evaluate(&failure(i * 100), Priority::Medium).unwrap();
            assert_eq!(update.escalate, i == 4);
            if update.escalate {
                manager.complete_escalation(&update.alert, true);
            }
        }
        let alert = manager.get(&failure(0).fingerprint()).unwrap();
        assert_eq!(alert.consecutive_failures, 8);
        assert_eq!(alert.status, AlertStatus::Escalated);
    }

    #[test]
    fn test_cooldown_allows_renotification() {
        let manager = manager();
        manager.evaluate(&failure(0), Priority::Medium);
        assert!(!manager.evaluate(&failure(30), Priority::Medium).unwrap().notify);
        assert!(manager.evaluate(&failure(61), Priority::Medium).unwrap().notify);
    }

    #[test]
    fn test_resolved_event_heals_and_new_alert_follows() {
        let manager = manager();
        let first = manager.evaluate(&failure(0), Priority::Medium).unwrap();
        manager.evaluate(&failure(1), Priority::Medium);

        let mut resolved = failure(2);
        resolved.resolve("reprobe");
        let healed = manager.evaluate(&resolved, Priority::Medium).unwrap();
        assert_eq!(healed.alert.status, AlertStatus::Healed);
        assert_eq!(manager.active_count(), 0);

        let reopened = manager.evaluate(&failure(3), Priority::Medium).unwrap();
        assert!(reopened.created);
        assert_ne!(reopened.alert.id, first.alert.id);
        assert_eq!(reopened.alert.consecutive_failures, 1);
    }

    #[test]
    fn test_resolved_event_without_alert_is_ignored() {
        let manager = manager();
        let mut resolved = failure(0);
        resolved.resolve("reprobe");
        assert!(manager.evaluate(&resolved, Priority::Medium).is_none());
    }

    #[test]
    fn test_endpoint_recovery_heals_all_types() {
        let manager = manager();
        manager.evaluate(&failure(0), Priority::Medium);
        manager.evaluate(
            &ErrorEvent::new(at(1), "Y", "/series", ErrorType::ServerError),
            Priority::Medium,
        );
        manager.evaluate(
            &ErrorEvent::new(at(1), "Y", "/other", ErrorType::Timeout),
            Priority::Medium,
        );

        let healed = manager.endpoint_recovered(&EndpointKey::new("Y", "/series"), at(2));
        assert_eq!(healed.len(), 2);
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let manager = AlertManager::new(AlertManagerConfig {
            history_len: 3,
            ..Default::default()
        });
        for i in 0..6 {
            manager.evaluate(&failure(i), Priority::Medium);
        }
        let history = manager.history(&failure(0).fingerprint());
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, at(3));
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast() {
        let manager = AlertManager::new(AlertManagerConfig {
            escalation_threshold: 2,
            ..Default::default()
        });
        let mut rx = manager.subscribe();

        manager.evaluate(&failure(0), Priority::High);
        let due = manager.evaluate(&failure(1), Priority::High).unwrap();
        manager.complete_escalation(&due.alert, true);
        manager.endpoint_recovered(&EndpointKey::new("Y", "/series"), at(2));

        let statuses: Vec<(Option<AlertStatus>, AlertStatus)> = (0..3)
            .map(|_| {
                let t = rx.try_recv().unwrap();
                (t.from, t.to)
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                (None, AlertStatus::Open),
                (Some(AlertStatus::Open), AlertStatus::Escalated),
                (Some(AlertStatus::Escalated), AlertStatus::Healed),
            ]
        );
    }

    #[test]
    fn test_undelivered_escalation_retries_on_next_failure() {
        let manager = AlertManager::new(AlertManagerConfig {
            escalation_threshold: 2,
            ..Default::default()
        });
        manager.evaluate(&failure(0), Priority::Medium);
        let due = manager.evaluate(&failure(1), Priority::Medium).unwrap();
        assert!(due.escalate);

        // While the attempt is out, further failures do not start another
        let during = manager.evaluate(&failure(2), Priority::Medium).unwrap();
        assert!(!during.escalate);

        let retry = manager.complete_escalation(&due.alert, false).unwrap();
        assert_eq!(retry.status, AlertStatus::Open);
        assert_eq!(retry.escalation, EscalationProgress::Retry);

        let again = manager.evaluate(&failure(3), Priority::Medium).unwrap();
        assert!(again.escalate);
        assert_eq!(again.alert.consecutive_failures, 4);
        manager.complete_escalation(&again.alert, true);

        let after = manager.evaluate(&failure(4), Priority::Medium).unwrap();
        assert!(!after.escalate);
        assert_eq!(after.alert.status, AlertStatus::Escalated);
    }

    #[test]
    fn test_completion_after_heal_is_ignored() {
        let manager = AlertManager::new(AlertManagerConfig {
            escalation_threshold: 1,
            ..Default::default()
        });
        let due = manager.evaluate(&failure(0), Priority::Medium).unwrap();
        assert!(due.escalate);
        manager.endpoint_recovered(&EndpointKey::new("Y", "/series"), at(1));

        assert!(manager.complete_escalation(&due.alert, true).is_none());
        let alert = manager.get(&failure(0).fingerprint()).unwrap();
        assert_eq!(alert.status, AlertStatus::Healed);

        // A newer alert on the same fingerprint is not touched by the stale result
        let reopened = manager.evaluate(&failure(2), Priority::Medium).unwrap();
        assert!(manager.complete_escalation(&due.alert, true).is_none());
        assert_eq!(
            manager.get(&failure(0).fingerprint()).unwrap().escalation,
            reopened.alert.escalation
        );
    }

    #[test]
    fn test_last_seen_never_moves_backwards() {
        let manager = manager();
        manager.evaluate(&failure(0), Priority::Medium);
        manager.evaluate(&failure(50), Priority::Medium);
        let late = manager.evaluate(&failure(20), Priority::Medium).unwrap();

        assert_eq!(late.alert.last_seen, at(50));
        assert_eq!(late.alert.first_seen, at(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_open_and_escalate_once() {
        let manager = std::sync::Arc::new(manager());
        let barrier = std::sync::Arc::new(tokio::sync::Barrier::new(32));

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let manager = std::sync::Arc::clone(&manager);
                let barrier = std::sync::Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager.evaluate(&failure(i), Priority::Medium).unwrap()
                })
            })
            .collect();

        let mut updates = Vec::new();
        for task in tasks {
            updates.push(task.await.unwrap());
        }

        assert_eq!(updates.iter().filter(|u| u.created).count(), 1);
        assert_eq!(updates.iter().filter(|u| u.escalate).count(), 1);
        let escalating = updates.iter().find(|u| u.escalate).unwrap();
        assert_eq!(escalating.alert.consecutive_failures, 5);

        let alert = manager.get(&failure(0).fingerprint()).unwrap();
        assert_eq!(alert.consecutive_failures, 32);
        assert_eq!(manager.active_count(), 1);
    }
}
