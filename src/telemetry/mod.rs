//! Telemetry Encoder
//!
//! Compact tabular export used for escalation payloads.

pub mod encoder;

pub use encoder::{decode_table, decode_tables, encode_table, Cell, RawTable, TabularRecord};

use crate::classifier::EndpointHealth;
use crate::domain::ErrorEvent;
use crate::learning::StrategyRate;

/// Recent events, strategy rates and endpoint health as three tables
pub fn escalation_payload(
    events: &[ErrorEvent],
    rates: &[StrategyRate],
    health: &[EndpointHealth],
) -> String {
    [
        encode_table("events", events),
        encode_table("strategies", rates),
        encode_table("endpoints", health),
    ]
    .join("\n")
}
