pub mod classifier;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod healing;
pub mod learning;
pub mod monitor;
pub mod persistence;
pub mod services;
pub mod supervisor;
pub mod telemetry;

pub use classifier::{classify, EndpointHealth, StatusBoard, StatusThresholds};
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal, ShutdownToken};
pub use coordinator::{Collaborators, Pipeline, ProcessReport};
pub use domain::{
    Endpoint, EndpointKey, EndpointRegistry, EndpointStatus, ErrorEvent, ErrorType, Fingerprint,
    HealthCheckResult, Priority, RawStatus,
};
pub use error::{Result, TelemetryError, VigilError};
pub use healing::{HealingEngine, HealingOutcome, HealingStrategy, StrategyCatalog};
pub use learning::{InnerRecord, LearningStore, OuterRecord, Pattern};
pub use persistence::{Cache, InMemoryCache, InMemoryStore, Store};
pub use supervisor::{
    Alert, AlertLevel, AlertManager, AlertManagerConfig, AlertStatus, EscalationCollaborator,
    Escalator,
};
