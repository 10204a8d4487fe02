use super::endpoint::{Endpoint, EndpointKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Transport-level outcome of a single poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum RawStatus {
    /// HTTP response with status code
    Http(u16),
    /// Poll exceeded the endpoint timeout
    Timeout,
    /// Connection could not be established (DNS, refused, reset, TLS)
    ConnectionFailed(String),
    /// Anything the prober could not map
    Other(String),
}

impl RawStatus {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            RawStatus::Http(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RawStatus::Http(code) if (200..300).contains(code))
    }
}

impl fmt::Display for RawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawStatus::Http(code) => write!(f, "HTTP {}", code),
            RawStatus::Timeout => write!(f, "TIMEOUT"),
            RawStatus::ConnectionFailed(reason) => write!(f, "CONNECTION_FAILED ({})", reason),
            RawStatus::Other(reason) => write!(f, "OTHER ({})", reason),
        }
    }
}

/// Result of one poll. Ephemeral: handed straight to the classifier.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub endpoint: Arc<Endpoint>,
    pub timestamp: DateTime<Utc>,
    pub latency: Duration,
    pub raw_status: RawStatus,
    pub payload_valid: bool,
    /// Age of the payload, when the endpoint declares a timestamp field
    pub payload_age: Option<Duration>,
    /// Raw body of a successful response, kept for last-known-good caching
    pub payload: Option<String>,
}

impl HealthCheckResult {
    pub fn new(endpoint: Arc<Endpoint>, raw_status: RawStatus, latency: Duration) -> Self {
        Self {
            endpoint,
            timestamp: Utc::now(),
            latency,
            raw_status,
            payload_valid: false,
            payload_age: None,
            payload: None,
        }
    }

    pub fn timeout(endpoint: Arc<Endpoint>) -> Self {
        let latency = endpoint.timeout();
        Self::new(endpoint, RawStatus::Timeout, latency)
    }

    pub fn with_payload(mut self, payload: String, valid: bool) -> Self {
        self.payload = Some(payload);
        self.payload_valid = valid;
        self
    }

    pub fn with_payload_age(mut self, age: Duration) -> Self {
        self.payload_age = Some(age);
        self
    }

    pub fn endpoint_key(&self) -> EndpointKey {
        self.endpoint.key()
    }
}

/// Broad family an error type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    DataQuality,
    Unknown,
}

/// Fixed failure taxonomy
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    RateLimit,
    AuthError,
    ServerError,
    InvalidData,
    StaleData,
    NetworkError,
    Unknown,
}

impl ErrorType {
    pub const ALL: [ErrorType; 8] = [
        ErrorType::Timeout,
        ErrorType::RateLimit,
        ErrorType::AuthError,
        ErrorType::ServerError,
        ErrorType::InvalidData,
        ErrorType::StaleData,
        ErrorType::NetworkError,
        ErrorType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Timeout => "timeout",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::AuthError => "auth_error",
            ErrorType::ServerError => "server_error",
            ErrorType::InvalidData => "invalid_data",
            ErrorType::StaleData => "stale_data",
            ErrorType::NetworkError => "network_error",
            ErrorType::Unknown => "unknown",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorType::Timeout | ErrorType::NetworkError => ErrorCategory::Transport,
            ErrorType::RateLimit | ErrorType::AuthError | ErrorType::ServerError => {
                ErrorCategory::Protocol
            }
            ErrorType::InvalidData | ErrorType::StaleData => ErrorCategory::DataQuality,
            ErrorType::Unknown => ErrorCategory::Unknown,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ErrorType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        ErrorType::ALL
            .iter()
            .find(|t| t.as_str() == s.to_lowercase())
            .copied()
            .ok_or_else(|| format!("Unknown error type: {}", s))
    }
}

/// Unique identity of an event: (timestamp, source_id, endpoint_path)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub endpoint_path: String,
}

/// Alert identity: (source, endpoint, error_type)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint {
    pub source_id: String,
    pub endpoint_path: String,
    pub error_type: ErrorType,
}

impl Fingerprint {
    pub fn new(
        source_id: impl Into<String>,
        endpoint_path: impl Into<String>,
        error_type: ErrorType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            endpoint_path: endpoint_path.into(),
            error_type,
        }
    }

    pub fn endpoint_key(&self) -> EndpointKey {
        EndpointKey::new(&self.source_id, &self.endpoint_path)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.source_id, self.endpoint_path, self.error_type
        )
    }
}

/// A classified failure.
///
/// Mutated once by the healing engine (`resolved`, `fix_method`), terminal afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub endpoint_path: String,
    pub error_type: ErrorType,
    pub http_status: Option<u16>,
    pub response_time_ms: u64,
    pub resolved: bool,
    pub fix_method: Option<String>,
}

impl ErrorEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        source_id: impl Into<String>,
        endpoint_path: impl Into<String>,
        error_type: ErrorType,
    ) -> Self {
        Self {
            timestamp,
            source_id: source_id.into(),
            endpoint_path: endpoint_path.into(),
            error_type,
            http_status: None,
            response_time_ms: 0,
            resolved: false,
            fix_method: None,
        }
    }

    pub fn with_http_status(mut self, status: Option<u16>) -> Self {
        self.http_status = status;
        self
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            timestamp: self.timestamp,
            source_id: self.source_id.clone(),
            endpoint_path: self.endpoint_path.clone(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.source_id, &self.endpoint_path, self.error_type)
    }

    pub fn endpoint_key(&self) -> EndpointKey {
        EndpointKey::new(&self.source_id, &self.endpoint_path)
    }

    /// Mark the event resolved by the named strategy
    pub fn resolve(&mut self, fix_method: impl Into<String>) {
        self.resolved = true;
        self.fix_method = Some(fix_method.into());
    }
}

/// User-visible per-endpoint status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    #[default]
    Healthy,
    Degraded,
    Critical,
    Failed,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Healthy => "healthy",
            EndpointStatus::Degraded => "degraded",
            EndpointStatus::Critical => "critical",
            EndpointStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EndpointStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "healthy" => Ok(EndpointStatus::Healthy),
            "degraded" => Ok(EndpointStatus::Degraded),
            "critical" => Ok(EndpointStatus::Critical),
            "failed" => Ok(EndpointStatus::Failed),
            _ => Err(format!("Unknown endpoint status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_categories() {
        assert_eq!(ErrorType::Timeout.category(), ErrorCategory::Transport);
        assert_eq!(ErrorType::NetworkError.category(), ErrorCategory::Transport);
        assert_eq!(ErrorType::RateLimit.category(), ErrorCategory::Protocol);
        assert_eq!(ErrorType::StaleData.category(), ErrorCategory::DataQuality);
        assert_eq!(ErrorType::Unknown.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_error_type_from_str() {
        for error_type in ErrorType::ALL {
            assert_eq!(ErrorType::try_from(error_type.as_str()).unwrap(), error_type);
        }
        assert!(ErrorType::try_from("bogus").is_err());
    }

    #[test]
    fn test_resolve_sets_fix_method() {
        let mut event = ErrorEvent::new(Utc::now(), "alpha", "/quote", ErrorType::RateLimit);
        assert!(!event.resolved);

        event.resolve("exponential_backoff_retry");
        assert!(event.resolved);
        assert_eq!(event.fix_method.as_deref(), Some("exponential_backoff_retry"));
    }

    #[test]
    fn test_fingerprint_display() {
        let fp = Fingerprint::new("beta", "/series", ErrorType::Timeout);
        assert_eq!(fp.to_string(), "beta:/series:timeout");
    }

    #[test]
    fn test_status_ordering() {
        assert!(EndpointStatus::Healthy < EndpointStatus::Degraded);
        assert!(EndpointStatus::Critical < EndpointStatus::Failed);
    }
}
