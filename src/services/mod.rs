pub mod health;

pub use health::{router, EndpointReport, HealthServer, HealthState, HealthStatus, StatusResponse};
