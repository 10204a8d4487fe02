//! Status probe HTTP server
//!
//! Liveness and readiness probes for process supervision (systemd/k8s), plus a
//! read-only JSON view of endpoint status and active alerts.

use crate::classifier::StatusBoard;
use crate::coordination::ShutdownToken;
use crate::coordinator::Pipeline;
use crate::domain::{EndpointRegistry, EndpointStatus, Priority};
use crate::error::VigilError;
use crate::supervisor::{Alert, AlertManager};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Overall service health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// One monitored endpoint in the status response
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub source_id: String,
    pub endpoint_path: String,
    pub priority: Priority,
    pub status: EndpointStatus,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub endpoints: Vec<EndpointReport>,
    pub alerts: Vec<Alert>,
}

/// Shared state for the status server
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    registry: Arc<EndpointRegistry>,
    board: Arc<StatusBoard>,
    alerts: Arc<AlertManager>,
}

impl HealthState {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        board: Arc<StatusBoard>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        Self {
            started_at: Utc::now(),
            registry,
            board,
            alerts,
        }
    }

    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self::new(
            Arc::clone(pipeline.registry()),
            Arc::clone(pipeline.board()),
            Arc::clone(pipeline.alerts()),
        )
    }

    /// Registered endpoints with their current windows; unchecked ones read healthy
    pub async fn endpoints(&self) -> Vec<EndpointReport> {
        let mut reports: Vec<EndpointReport> = self
            .registry
            .list()
            .await
            .iter()
            .map(|endpoint| {
                let key = endpoint.key();
                match self.board.health(&key) {
                    Some(h) => EndpointReport {
                        source_id: h.source_id,
                        endpoint_path: h.endpoint_path,
                        priority: endpoint.priority,
                        status: h.status,
                        error_rate: h.error_rate,
                        consecutive_failures: h.consecutive_failures,
                        total_checks: h.total_checks,
                        last_checked: h.last_checked,
                    },
                    None => EndpointReport {
                        source_id: key.source_id,
                        endpoint_path: key.endpoint_path,
                        priority: endpoint.priority,
                        status: EndpointStatus::Healthy,
                        error_rate: 0.0,
                        consecutive_failures: 0,
                        total_checks: 0,
                        last_checked: None,
                    },
                }
            })
            .collect();
        reports.sort_by(|a, b| {
            (&a.source_id, &a.endpoint_path).cmp(&(&b.source_id, &b.endpoint_path))
        });
        reports
    }

    pub async fn get_status(&self) -> StatusResponse {
        let endpoints = self.endpoints().await;
        let status = overall_status(&endpoints);
        let uptime = (Utc::now() - self.started_at).num_seconds().max(0) as u64;

        StatusResponse {
            status,
            timestamp: Utc::now(),
            uptime_seconds: uptime,
            endpoints,
            alerts: self.alerts.active_alerts(),
        }
    }
}

/// Unhealthy when a critical-priority endpoint has failed, degraded when
/// anything is off healthy
fn overall_status(endpoints: &[EndpointReport]) -> HealthStatus {
    if endpoints
        .iter()
        .any(|e| e.priority == Priority::Critical && e.status == EndpointStatus::Failed)
    {
        HealthStatus::Unhealthy
    } else if endpoints.iter().any(|e| e.status != EndpointStatus::Healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Status probe server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until the token is cancelled
    pub async fn run(&self, mut token: ShutdownToken) -> crate::Result<()> {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting status server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                token.cancelled().await;
            })
            .await
            .map_err(|e| VigilError::Internal(format!("Status server error: {}", e)))?;

        info!("Status server stopped");
        Ok(())
    }

    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

/// Liveness probe - is the process alive?
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe - 503 while a critical endpoint is failed
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match overall_status(&state.endpoints().await) {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn status_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(state.get_status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::StatusThresholds;
    use crate::domain::{Endpoint, EndpointKey};
    use crate::supervisor::AlertManagerConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn state() -> (Arc<HealthState>, Arc<StatusBoard>) {
        let registry = EndpointRegistry::from_endpoints([
            Endpoint::new("alpha", "/quote", "http://alpha.example.com/quote")
                .with_priority(Priority::Critical),
            Endpoint::new("beta", "/series", "http://beta.example.com/series")
                .with_priority(Priority::Low),
        ])
        .await
        .unwrap();
        let board = Arc::new(StatusBoard::new(StatusThresholds::default()));
        let state = HealthState::new(
            Arc::new(registry),
            Arc::clone(&board),
            Arc::new(AlertManager::new(AlertManagerConfig::default())),
        );
        (Arc::new(state), board)
    }

    fn fail(board: &StatusBoard, source: &str, path: &str, times: u32) {
        let key = EndpointKey::new(source, path);
        for _ in 0..times {
            board.observe(&key, true, Utc::now());
        }
    }

    async fn get(state: Arc<HealthState>, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_liveness_always_ok() {
        let (state, _) = state().await;
        assert_eq!(get(state, "/healthz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_ignores_non_critical_failures() {
        let (state, board) = state().await;
        fail(&board, "beta", "/series", 20);
        assert_eq!(get(state, "/readyz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_fails_on_critical_endpoint() {
        let (state, board) = state().await;
        fail(&board, "alpha", "/quote", 20);
        assert_eq!(
            get(state, "/readyz").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_status_lists_all_registered_endpoints() {
        let (state, board) = state().await;
        fail(&board, "beta", "/series", 20);

        let (code, body) = get(state, "/status").await;
        assert_eq!(code, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        let endpoints = json["endpoints"].as_array().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0]["source_id"], "alpha");
        assert_eq!(endpoints[0]["status"], "healthy");
        assert_eq!(endpoints[1]["status"], "failed");
        assert_eq!(endpoints[1]["priority"], "low");
    }
}
