//! Alert Escalation Manager
//!
//! - Alert manager: per-fingerprint dedup, cooldown and escalation threshold
//! - Escalation: rate-limited handoff to an external diagnosis collaborator

pub mod alert_manager;
pub mod escalation;

pub use alert_manager::{
    level_for, Alert, AlertLevel, AlertManager, AlertManagerConfig, AlertStatus, AlertTransition,
    AlertUpdate, EscalationProgress,
};
pub use escalation::{
    collaborator_from_config, EscalationCollaborator, EscalationConfig, EscalationContext,
    EscalationResult, Escalator, LogEscalator, WebhookEscalator,
};
