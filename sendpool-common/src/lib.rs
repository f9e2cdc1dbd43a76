//! Pieces shared by every sendpool crate: logging setup, audit events and the
//! shutdown signal broadcast between long-running tasks.

pub mod audit;
pub mod logging;

pub use tracing;

/// Lifecycle signal broadcast to background tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
