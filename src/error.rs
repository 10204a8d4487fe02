use thiserror::Error;

/// Main error type for the healing pipeline
#[derive(Error, Debug)]
pub enum VigilError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Telemetry encoding error: {0}")]
    Telemetry(#[from] TelemetryError),

    // Registry errors
    #[error("Endpoint already registered: {source_id}{endpoint_path}")]
    DuplicateEndpoint {
        source_id: String,
        endpoint_path: String,
    },

    #[error("Unknown endpoint: {source_id}{endpoint_path}")]
    UnknownEndpoint {
        source_id: String,
        endpoint_path: String,
    },

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Collaborator errors
    #[error("Escalation failed: {0}")]
    Escalation(String),

    #[error("Store error: {0}")]
    Store(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for VigilError
pub type Result<T> = std::result::Result<T, VigilError>;

/// Errors raised while decoding a telemetry table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Malformed table header: {0}")]
    MalformedHeader(String),

    #[error("Field mismatch: expected [{expected}], found [{found}]")]
    FieldMismatch { expected: String, found: String },

    #[error("Row count mismatch: header declares {declared}, found {found}")]
    RowCountMismatch { declared: usize, found: usize },

    #[error("Row {row} has {found} fields, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Unterminated quoted field in row {0}")]
    UnterminatedQuote(usize),
}
