//! Poll scheduling
//!
//! One cancellable task per endpoint, each on its own interval. A shared
//! semaphore bounds how many polls are in flight at once.

use super::probe::Prober;
use crate::coordination::ShutdownToken;
use crate::domain::{Endpoint, HealthCheckResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Polls a single endpoint with its timeout enforced
pub struct HealthMonitor {
    prober: Arc<dyn Prober>,
}

impl HealthMonitor {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    /// Poll with the endpoint's own timeout
    pub async fn poll(&self, endpoint: Arc<Endpoint>) -> HealthCheckResult {
        let timeout = endpoint.timeout();
        self.poll_with_timeout(endpoint, timeout).await
    }

    /// Poll with an explicit timeout. A poll that overruns is reported as
    /// `TIMEOUT` rather than awaited.
    pub async fn poll_with_timeout(
        &self,
        endpoint: Arc<Endpoint>,
        timeout: Duration,
    ) -> HealthCheckResult {
        match tokio::time::timeout(timeout, self.prober.probe(Arc::clone(&endpoint), timeout)).await
        {
            Ok(result) => result,
            Err(_) => {
                debug!("Poll of {} timed out after {:?}", endpoint.key(), timeout);
                let mut result = HealthCheckResult::timeout(endpoint);
                result.latency = timeout;
                result
            }
        }
    }
}

/// Spawns and owns the per-endpoint poll tasks
pub struct MonitorScheduler {
    monitor: Arc<HealthMonitor>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl MonitorScheduler {
    pub fn new(monitor: Arc<HealthMonitor>, pool_size: usize) -> Self {
        Self {
            monitor,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Start polling `endpoint`, sending each result to `results`
    pub fn spawn(
        &mut self,
        endpoint: Arc<Endpoint>,
        results: mpsc::Sender<HealthCheckResult>,
        mut token: ShutdownToken,
    ) {
        let monitor = Arc::clone(&self.monitor);
        let permits = Arc::clone(&self.permits);

        self.tasks.spawn(async move {
            let key = endpoint.key();
            let mut interval = tokio::time::interval(endpoint.check_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("Polling {} every {:?}", key, endpoint.check_interval());

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let permit = tokio::select! {
                    _ = token.cancelled() => break,
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                // In-flight polls are dropped on cancellation, not awaited
                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = monitor.poll(Arc::clone(&endpoint)) => result,
                };
                drop(permit);

                if results.send(result).await.is_err() {
                    break;
                }
            }

            debug!("Poll task for {} stopped", key);
        });
    }

    pub fn spawn_all(
        &mut self,
        endpoints: impl IntoIterator<Item = Arc<Endpoint>>,
        results: mpsc::Sender<HealthCheckResult>,
        token: ShutdownToken,
    ) {
        let mut count = 0;
        for endpoint in endpoints {
            self.spawn(endpoint, results.clone(), token.clone());
            count += 1;
        }
        info!("Started {} poll tasks", count);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every poll task without waiting for in-flight polls
    pub async fn stop(&mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
    }
}
