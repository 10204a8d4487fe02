//! Escalation to an external diagnosis collaborator
//!
//! Invocations are rate limited twice: a sliding one-hour budget across all
//! fingerprints, and a per-fingerprint cooldown. The collaborator's contract
//! ends at delivery; whether the issue is fixed shows up in later polls.

use super::alert_manager::Alert;
use crate::classifier::EndpointHealth;
use crate::domain::{ErrorEvent, Fingerprint};
use crate::error::{Result, VigilError};
use crate::learning::StrategyRate;
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Configuration for escalation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Webhook receiving escalations; logged only when unset
    pub webhook_url: Option<String>,
    /// Invocation budget per rolling hour (default: 10)
    pub max_per_hour: u32,
    /// Minimum interval between escalations of one fingerprint (default: 900s)
    pub cooldown_secs: u64,
    /// Collaborator call timeout (default: 10000ms)
    pub timeout_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_per_hour: 10,
            cooldown_secs: 900,
            timeout_ms: 10_000,
        }
    }
}

impl EscalationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// External diagnosis collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EscalationCollaborator: Send + Sync {
    /// Deliver an issue summary with its telemetry payload
    async fn escalate(&self, summary: &str, payload: &str) -> Result<()>;
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    summary: &'a str,
    payload: &'a str,
    sent_at: DateTime<Utc>,
}

/// Posts escalations as JSON to a webhook
#[derive(Clone)]
pub struct WebhookEscalator {
    client: Client,
    webhook_url: String,
}

impl WebhookEscalator {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let webhook_url = webhook_url.into();
        url::Url::parse(&webhook_url)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl EscalationCollaborator for WebhookEscalator {
    async fn escalate(&self, summary: &str, payload: &str) -> Result<()> {
        let message = WebhookMessage {
            summary,
            payload,
            sent_at: Utc::now(),
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!("Escalation webhook accepted");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(VigilError::Escalation(format!("HTTP {}: {}", status, body)))
        }
    }
}

/// Writes escalations to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEscalator;

#[async_trait]
impl EscalationCollaborator for LogEscalator {
    async fn escalate(&self, summary: &str, payload: &str) -> Result<()> {
        warn!("ESCALATION {}", summary);
        debug!("Escalation payload:\n{}", payload);
        Ok(())
    }
}

/// Build the collaborator configured by `config`
pub fn collaborator_from_config(config: &EscalationConfig) -> Result<Arc<dyn EscalationCollaborator>> {
    match &config.webhook_url {
        Some(url) => {
            info!("Escalation webhook enabled");
            Ok(Arc::new(WebhookEscalator::new(url.clone(), config.timeout())?))
        }
        None => Ok(Arc::new(LogEscalator)),
    }
}

/// What happened to an escalation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationResult {
    Sent,
    /// Hourly budget exhausted
    RateLimited,
    /// Fingerprint escalated too recently
    CoolingDown,
    Failed(String),
}

/// Context packaged with an escalation
#[derive(Debug, Clone, Default)]
pub struct EscalationContext {
    pub events: Vec<ErrorEvent>,
    pub rates: Vec<StrategyRate>,
    pub health: Vec<EndpointHealth>,
}

impl EscalationContext {
    pub fn payload(&self) -> String {
        telemetry::escalation_payload(&self.events, &self.rates, &self.health)
    }
}

pub struct Escalator {
    config: EscalationConfig,
    collaborator: Arc<dyn EscalationCollaborator>,
    window: Mutex<VecDeque<DateTime<Utc>>>,
    last_by_fingerprint: DashMap<Fingerprint, DateTime<Utc>>,
    invocations: AtomicU64,
}

impl Escalator {
    pub fn new(config: EscalationConfig, collaborator: Arc<dyn EscalationCollaborator>) -> Self {
        Self {
            config,
            collaborator,
            window: Mutex::new(VecDeque::new()),
            last_by_fingerprint: DashMap::new(),
            invocations: AtomicU64::new(0),
        }
    }

    /// Collaborator invocations so far
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub async fn escalate(&self, alert: &Alert, context: &EscalationContext) -> EscalationResult {
        self.escalate_at(alert, context, Utc::now()).await
    }

    pub async fn escalate_at(
        &self,
        alert: &Alert,
        context: &EscalationContext,
        now: DateTime<Utc>,
    ) -> EscalationResult {
        if let Err(result) = self.reserve(&alert.fingerprint, now) {
            warn!("Escalation of {} suppressed: {:?}", alert.fingerprint, result);
            return result;
        }

        self.invocations.fetch_add(1, Ordering::Relaxed);
        let summary = alert.summary();
        let payload = context.payload();

        let result = match tokio::time::timeout(
            self.config.timeout(),
            self.collaborator.escalate(&summary, &payload),
        )
        .await
        {
            Ok(Ok(())) => {
                info!("Escalated {} ({} events)", alert.fingerprint, context.events.len());
                return EscalationResult::Sent;
            }
            Ok(Err(e)) => {
                error!("Escalation of {} failed: {}", alert.fingerprint, e);
                EscalationResult::Failed(e.to_string())
            }
            Err(_) => {
                error!("Escalation of {} timed out", alert.fingerprint);
                EscalationResult::Failed("timed out".to_string())
            }
        };

        // Nothing was delivered, so the fingerprint may try again without
        // waiting out its cooldown. The hourly slot stays spent.
        self.last_by_fingerprint
            .remove_if(&alert.fingerprint, |_, reserved| *reserved == now);
        result
    }

    /// Claim a slot in both limits, or say which one refused
    fn reserve(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), EscalationResult> {
        let cooldown = ChronoDuration::seconds(self.config.cooldown_secs as i64);
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = self.last_by_fingerprint.get(fingerprint) {
            if now - *last < cooldown {
                return Err(EscalationResult::CoolingDown);
            }
        }

        let hour_ago = now - ChronoDuration::hours(1);
        while window.front().is_some_and(|t| *t <= hour_ago) {
            window.pop_front();
        }
        if window.len() >= self.config.max_per_hour as usize {
            return Err(EscalationResult::RateLimited);
        }

        window.push_back(now);
        self.last_by_fingerprint.insert(fingerprint.clone(), now);
        Ok(())
    }
}
