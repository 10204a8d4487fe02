//! Error Classifier
//!
//! Maps raw poll outcomes onto the fixed failure taxonomy. Classification is
//! pure: it never fails and never touches shared state. Anything the mapping
//! does not recognise becomes `unknown`.

pub mod window;

pub use window::{EndpointHealth, ErrorRateWindow, StatusBoard, StatusThresholds};

use crate::domain::{ErrorEvent, ErrorType, HealthCheckResult, RawStatus};

/// Classify a poll result. Returns `None` for a healthy result.
pub fn classify(result: &HealthCheckResult) -> Option<ErrorEvent> {
    let error_type = error_type_for(result)?;

    Some(
        ErrorEvent::new(
            result.timestamp,
            &result.endpoint.source_id,
            &result.endpoint.endpoint_path,
            error_type,
        )
        .with_http_status(result.raw_status.http_status())
        .with_response_time(result.latency),
    )
}

/// Map transport, protocol and payload signals to an error type
pub fn error_type_for(result: &HealthCheckResult) -> Option<ErrorType> {
    match &result.raw_status {
        RawStatus::Timeout => Some(ErrorType::Timeout),
        RawStatus::ConnectionFailed(_) => Some(ErrorType::NetworkError),
        RawStatus::Http(429) => Some(ErrorType::RateLimit),
        RawStatus::Http(401) | RawStatus::Http(403) => Some(ErrorType::AuthError),
        RawStatus::Http(code) if (500..600).contains(code) => Some(ErrorType::ServerError),
        RawStatus::Http(code) if (200..300).contains(code) => payload_error(result),
        RawStatus::Http(_) | RawStatus::Other(_) => Some(ErrorType::Unknown),
    }
}

fn payload_error(result: &HealthCheckResult) -> Option<ErrorType> {
    if !result.payload_valid {
        return Some(ErrorType::InvalidData);
    }

    match (result.payload_age, result.endpoint.freshness()) {
        (Some(age), Some(bound)) if age > bound => Some(ErrorType::StaleData),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Endpoint;
    use std::sync::Arc;
    use std::time::Duration;

    fn endpoint() -> Arc<Endpoint> {
        Arc::new(
            Endpoint::new("alpha", "/quote", "https://alpha.example.com/quote")
                .with_freshness(60, "/updated_at"),
        )
    }

    fn http(code: u16) -> HealthCheckResult {
        HealthCheckResult::new(endpoint(), RawStatus::Http(code), Duration::from_millis(42))
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(error_type_for(&http(429)), Some(ErrorType::RateLimit));
        assert_eq!(error_type_for(&http(401)), Some(ErrorType::AuthError));
        assert_eq!(error_type_for(&http(403)), Some(ErrorType::AuthError));
        assert_eq!(error_type_for(&http(500)), Some(ErrorType::ServerError));
        assert_eq!(error_type_for(&http(503)), Some(ErrorType::ServerError));
        assert_eq!(error_type_for(&http(404)), Some(ErrorType::Unknown));
        assert_eq!(error_type_for(&http(302)), Some(ErrorType::Unknown));
    }

    #[test]
    fn test_transport_mapping() {
        let timeout = HealthCheckResult::timeout(endpoint());
        assert_eq!(error_type_for(&timeout), Some(ErrorType::Timeout));

        let refused = HealthCheckResult::new(
            endpoint(),
            RawStatus::ConnectionFailed("connection refused".into()),
            Duration::from_millis(3),
        );
        assert_eq!(error_type_for(&refused), Some(ErrorType::NetworkError));

        let other = HealthCheckResult::new(
            endpoint(),
            RawStatus::Other("body decode".into()),
            Duration::ZERO,
        );
        assert_eq!(error_type_for(&other), Some(ErrorType::Unknown));
    }

    #[test]
    fn test_payload_checks() {
        let invalid = http(200).with_payload("<html>".into(), false);
        assert_eq!(error_type_for(&invalid), Some(ErrorType::InvalidData));

        let fresh = http(200)
            .with_payload("{}".into(), true)
            .with_payload_age(Duration::from_secs(10));
        assert_eq!(error_type_for(&fresh), None);

        let stale = http(200)
            .with_payload("{}".into(), true)
            .with_payload_age(Duration::from_secs(120));
        assert_eq!(error_type_for(&stale), Some(ErrorType::StaleData));
    }

    #[test]
    fn test_classify_builds_event() {
        let event = classify(&http(429)).unwrap();
        assert_eq!(event.source_id, "alpha");
        assert_eq!(event.endpoint_path, "/quote");
        assert_eq!(event.error_type, ErrorType::RateLimit);
        assert_eq!(event.http_status, Some(429));
        assert_eq!(event.response_time_ms, 42);
        assert!(!event.resolved);

        let healthy = http(200).with_payload("{}".into(), true);
        assert!(classify(&healthy).is_none());
    }
}
