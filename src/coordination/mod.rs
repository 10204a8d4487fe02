//! Coordination
//!
//! Cancellation and graceful shutdown shared by polling and healing tasks.

pub mod shutdown;

pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownPhase, ShutdownSignal,
    ShutdownToken, StepFuture,
};
