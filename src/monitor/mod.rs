//! Health Monitor
//!
//! Polls every registered endpoint on its own interval. A failed poll is data:
//! it comes back as a `HealthCheckResult` and is never propagated as an error.

pub mod probe;
pub mod scheduler;

pub use probe::{inspect_payload, HttpProber, MonitorConfig, Prober};
pub use scheduler::{HealthMonitor, MonitorScheduler};
