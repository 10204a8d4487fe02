//! Strategy execution
//!
//! `StrategyExecutor` is the seam between the healing state machine and the
//! world. `ActionExecutor` carries out each `StrategyAction` against the
//! monitor, the cache and the fallback chains.

use super::fallback::FallbackResolver;
use super::strategy::{HealingStrategy, StrategyAction};
use crate::classifier::classify;
use crate::domain::{Endpoint, EndpointRegistry, ErrorEvent, HealthCheckResult};
use crate::monitor::HealthMonitor;
use crate::persistence::Cache;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Backoff curve for retrying strategies
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay when nothing has been learned (default: 500ms)
    pub base_delay_ms: u64,
    /// Upper bound for any delay (default: 30s)
    pub max_delay_ms: u64,
    /// Growth per retry (default: 2.0)
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction (default: 0.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry `n` (0-based), starting from `start_ms`
    pub fn delay_ms(&self, start_ms: f64, n: u32) -> f64 {
        let raw = start_ms * self.multiplier.powi(n as i32);
        let jittered = if self.jitter > 0.0 {
            let spread = self.jitter.min(1.0);
            raw * rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread))
        } else {
            raw
        };
        jittered.clamp(0.0, self.max_delay_ms as f64)
    }
}

/// What an action reported
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    /// The action's own check already confirmed recovery
    pub verified: bool,
    /// Parameter used (delay or timeout, in ms), fed to the learning store
    pub param: Option<f64>,
    pub detail: String,
}

impl ActionOutcome {
    /// Succeeded and confirmed by the action itself
    pub fn verified(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            verified: true,
            param: None,
            detail: detail.into(),
        }
    }

    /// Succeeded, still needs a verification probe
    pub fn succeeded(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            verified: false,
            param: None,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            verified: false,
            param: None,
            detail: detail.into(),
        }
    }

    pub fn with_param(mut self, param: f64) -> Self {
        self.param = Some(param);
        self
    }
}

/// Everything an action needs to know about the event it is healing
#[derive(Debug, Clone)]
pub struct HealingContext<'a> {
    pub event: &'a ErrorEvent,
    pub endpoint: Arc<Endpoint>,
    /// Position of this attempt within the event (0-based)
    pub attempt: u32,
    /// Learned parameter for (source, error_type, strategy), if any
    pub learned_param: Option<f64>,
}

#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    /// Run one strategy
    async fn apply(&self, ctx: &HealingContext<'_>, strategy: &HealingStrategy) -> ActionOutcome;

    /// Lightweight check that the endpoint is healthy again
    async fn verify(&self, endpoint: Arc<Endpoint>) -> bool;
}

/// Executes actions for real
pub struct ActionExecutor {
    monitor: Arc<HealthMonitor>,
    cache: Arc<dyn Cache>,
    fallback: Arc<FallbackResolver>,
    registry: Arc<EndpointRegistry>,
    backoff: BackoffConfig,
    timeout_extension_factor: f64,
    max_timeout_ms: u64,
    cache_ttl: Duration,
}

impl ActionExecutor {
    pub fn new(
        monitor: Arc<HealthMonitor>,
        cache: Arc<dyn Cache>,
        fallback: Arc<FallbackResolver>,
        registry: Arc<EndpointRegistry>,
        config: &super::HealingConfig,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            monitor,
            cache,
            fallback,
            registry,
            backoff: config.backoff.clone(),
            timeout_extension_factor: config.timeout_extension_factor,
            max_timeout_ms: config.max_timeout_ms,
            cache_ttl,
        }
    }

    fn healthy(result: &HealthCheckResult) -> bool {
        classify(result).is_none()
    }

    async fn reprobe(&self, endpoint: Arc<Endpoint>) -> ActionOutcome {
        let result = self.monitor.poll(endpoint).await;
        if Self::healthy(&result) {
            self.remember(&result).await;
            ActionOutcome::verified("endpoint healthy on reprobe")
        } else {
            ActionOutcome::failed(format!("reprobe returned {}", result.raw_status))
        }
    }

    async fn retry_with_backoff(&self, ctx: &HealingContext<'_>, retries: u32) -> ActionOutcome {
        let start = ctx
            .learned_param
            .unwrap_or(self.backoff.base_delay_ms as f64);
        let mut last_status = String::new();

        for n in 0..retries.max(1) {
            let delay = self.backoff.delay_ms(start, ctx.attempt + n);
            tokio::time::sleep(Duration::from_secs_f64(delay / 1000.0)).await;

            let result = self.monitor.poll(Arc::clone(&ctx.endpoint)).await;
            if Self::healthy(&result) {
                self.remember(&result).await;
                return ActionOutcome::verified(format!("healthy after {:.0}ms backoff", delay))
                    .with_param(delay);
            }
            last_status = result.raw_status.to_string();
            debug!(
                "Backoff retry {} for {} failed: {}",
                n + 1,
                ctx.endpoint.key(),
                last_status
            );
        }

        ActionOutcome::failed(format!("still failing after backoff: {}", last_status))
    }

    async fn extend_timeout(&self, ctx: &HealingContext<'_>) -> ActionOutcome {
        let floor = ctx.endpoint.timeout_ms as f64;
        let ceiling = (self.max_timeout_ms as f64).max(floor);
        let extended = ctx
            .learned_param
            .unwrap_or(floor * self.timeout_extension_factor)
            .clamp(floor, ceiling);
        let timeout = Duration::from_millis(extended as u64);

        let result = self
            .monitor
            .poll_with_timeout(Arc::clone(&ctx.endpoint), timeout)
            .await;
        if Self::healthy(&result) {
            self.remember(&result).await;
            ActionOutcome::verified(format!("healthy with {}ms timeout", extended as u64))
                .with_param(extended)
        } else {
            ActionOutcome::failed(format!(
                "{} with {}ms timeout",
                result.raw_status, extended as u64
            ))
        }
    }

    async fn serve_cached(&self, endpoint: &Endpoint) -> ActionOutcome {
        match self.cache.get(&endpoint.cache_key()).await {
            Some(_) => ActionOutcome::verified("serving last-known-good payload"),
            None => ActionOutcome::failed("no last-known-good payload cached"),
        }
    }

    async fn source_fallback(&self, endpoint: &Endpoint) -> ActionOutcome {
        let primary = &endpoint.source_id;
        let mut tried: HashSet<String> = HashSet::new();
        tried.insert(primary.clone());

        while let Some(alternate) = self.fallback.next_alternate(primary, &tried) {
            tried.insert(alternate.clone());

            let Some(alt_endpoint) = self.registry.get(&alternate, &endpoint.endpoint_path).await
            else {
                debug!(
                    "Alternate {} has no {} endpoint, skipping",
                    alternate, endpoint.endpoint_path
                );
                continue;
            };

            let started = Instant::now();
            let result = self.monitor.poll(alt_endpoint).await;
            if !Self::healthy(&result) {
                debug!("Alternate {} unhealthy: {}", alternate, result.raw_status);
                continue;
            }

            if let Some(payload) = result.payload {
                self.cache
                    .set(&endpoint.cache_key(), payload, self.cache_ttl)
                    .await;
            }
            let elapsed = started.elapsed();
            self.fallback.record_switch(primary, elapsed);
            info!(
                "Switched {}{} to alternate source {}",
                primary, endpoint.endpoint_path, alternate
            );
            return ActionOutcome::verified(format!("switched to {}", alternate))
                .with_param(elapsed.as_secs_f64() * 1000.0);
        }

        ActionOutcome::failed("fallback chain exhausted")
    }

    /// Healthy probes during healing refresh the last-known-good payload
    async fn remember(&self, result: &HealthCheckResult) {
        if let Some(payload) = &result.payload {
            self.cache
                .set(&result.endpoint.cache_key(), payload.clone(), self.cache_ttl)
                .await;
        }
    }
}

#[async_trait]
impl StrategyExecutor for ActionExecutor {
    async fn apply(&self, ctx: &HealingContext<'_>, strategy: &HealingStrategy) -> ActionOutcome {
        match &strategy.action {
            StrategyAction::Reprobe => self.reprobe(Arc::clone(&ctx.endpoint)).await,
            StrategyAction::RetryWithBackoff { retries } => {
                self.retry_with_backoff(ctx, *retries).await
            }
            StrategyAction::ExtendTimeout => self.extend_timeout(ctx).await,
            StrategyAction::ServeCached => self.serve_cached(&ctx.endpoint).await,
            StrategyAction::SourceFallback => self.source_fallback(&ctx.endpoint).await,
        }
    }

    async fn verify(&self, endpoint: Arc<Endpoint>) -> bool {
        let result = self.monitor.poll(endpoint).await;
        Self::healthy(&result)
    }
}
