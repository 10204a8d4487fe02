//! Pipeline Coordinator
//!
//! Owns every component and drives poll results through detection,
//! classification, healing, learning and escalation.

pub mod pipeline;

pub use pipeline::{Collaborators, Pipeline, ProcessReport};
