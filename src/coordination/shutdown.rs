//! Graceful Shutdown Handler
//!
//! Cancellation for polling and healing tasks. Polls are cancelled outright;
//! in-flight healing attempts get a bounded grace period to finish before they
//! are aborted.

use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown - skip the healing grace period
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time in-flight healing attempts get to finish (default: 30s)
    pub grace_secs: u64,
    /// Time to wait for the store to flush (default: 10s)
    pub store_flush_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_secs: 30,
            store_flush_timeout_secs: 10,
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// Cancelling poll tasks
    StoppingPolls,
    /// Waiting for healing attempts within the grace period
    DrainingHealing,
    /// Flushing the durable store
    FlushingStore,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingPolls => write!(f, "stopping_polls"),
            ShutdownPhase::DrainingHealing => write!(f, "draining_healing"),
            ShutdownPhase::FlushingStore => write!(f, "flushing_store"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Boxed future returned by each shutdown step
pub type StepFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
    phase_tx: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (signal_tx, _) = watch::channel(None);
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Self {
            config,
            signal_tx,
            phase_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.config.grace_secs)
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.signal_tx.borrow().is_some()
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    /// Request shutdown. Only the first request counts.
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        let accepted = self.signal_tx.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(signal);
                true
            }
        });

        if accepted {
            info!("Shutdown requested: {}", signal);
        } else {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
        }
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase_tx.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Token handed to every cancellable task
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: self.signal_tx.subscribe(),
        }
    }

    /// Run the shutdown sequence:
    /// 1. Cancel polls
    /// 2. Drain healing attempts within the grace period (skipped on urgent)
    /// 3. Flush the store
    pub async fn execute(
        &self,
        stop_polls: impl FnOnce() -> StepFuture<()>,
        drain_healing: impl FnOnce(Duration) -> StepFuture<usize>,
        flush_store: impl FnOnce() -> StepFuture<Result<(), String>>,
    ) {
        let start = std::time::Instant::now();

        self.set_phase(ShutdownPhase::StoppingPolls);
        stop_polls().await;
        debug!("Poll tasks cancelled");

        self.set_phase(ShutdownPhase::DrainingHealing);
        let grace = match *self.signal_tx.borrow() {
            Some(ShutdownSignal::Urgent) => Duration::ZERO,
            _ => self.grace_period(),
        };
        let aborted = drain_healing(grace).await;
        if aborted > 0 {
            warn!(
                "{} healing attempts aborted after {:?} grace period",
                aborted, grace
            );
        } else {
            debug!("All healing attempts completed");
        }

        self.set_phase(ShutdownPhase::FlushingStore);
        let flush_timeout = Duration::from_secs(self.config.store_flush_timeout_secs);
        match tokio::time::timeout(flush_timeout, flush_store()).await {
            Ok(Ok(())) => debug!("Store flushed"),
            Ok(Err(e)) => warn!("Store flush error: {}", e),
            Err(_) => warn!(
                "Store flush timeout after {}s",
                self.config.store_flush_timeout_secs
            ),
        }

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown completed in {:?}", start.elapsed());
    }
}

/// Cancellation token for async tasks
#[derive(Clone)]
pub struct ShutdownToken {
    signal_rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    /// Token that is never cancelled (one-shot commands, tests)
    pub fn never() -> Self {
        let (_, rx) = watch::channel(None);
        Self { signal_rx: rx }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal_rx.borrow().is_some()
    }

    /// Resolves once shutdown is requested
    pub async fn cancelled(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.signal_rx.borrow_and_update() {
                return signal;
            }
            if self.signal_rx.changed().await.is_err() {
                // Coordinator gone without a request: nothing can cancel us any more
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Install OS signal handlers that request shutdown
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name, request) in [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ] {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("Received {}", name);
                        shutdown.request_shutdown(request);
                    }
                    Err(e) => error!("Failed to install {} handler: {}", name, e),
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Running.to_string(), "running");
        assert_eq!(ShutdownPhase::DrainingHealing.to_string(), "draining_healing");
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = GracefulShutdown::with_defaults();
        let token = shutdown.token();

        assert!(!shutdown.is_shutdown_requested());
        assert!(!token.is_cancelled());

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert!(shutdown.is_shutdown_requested());
        assert!(token.is_cancelled());

        // Duplicate request keeps the first signal
        shutdown.request_shutdown(ShutdownSignal::Urgent);
        let mut token = shutdown.token();
        assert_eq!(token.cancelled().await, ShutdownSignal::Graceful);
    }

    #[tokio::test]
    async fn test_token_wakes_waiters() {
        let shutdown = Arc::new(GracefulShutdown::with_defaults());
        let mut token = shutdown.token();

        let waiter = tokio::spawn(async move { token.cancelled().await });
        shutdown.request_shutdown(ShutdownSignal::Urgent);

        assert_eq!(waiter.await.unwrap(), ShutdownSignal::Urgent);
    }

    #[tokio::test]
    async fn test_execute_runs_phases() {
        let shutdown = GracefulShutdown::with_defaults();
        shutdown.request_shutdown(ShutdownSignal::Urgent);

        shutdown
            .execute(
                || Box::pin(async {}),
                |grace| {
                    assert_eq!(grace, Duration::ZERO);
                    Box::pin(async { 0 })
                },
                || Box::pin(async { Ok(()) }),
            )
            .await;

        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
    }

    #[test]
    fn test_cancelled_stays_pending_until_requested() {
        let shutdown = GracefulShutdown::with_defaults();
        let mut token = shutdown.token();
        let mut cancelled = tokio_test::task::spawn(token.cancelled());

        tokio_test::assert_pending!(cancelled.poll());
        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert!(cancelled.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(cancelled.poll()),
            ShutdownSignal::Graceful
        );
    }

    #[test]
    fn test_never_token() {
        let mut token = ShutdownToken::never();
        assert!(!token.is_cancelled());

        // The sender is gone, so this must park rather than resolve
        let mut cancelled = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(cancelled.poll());
    }
}
