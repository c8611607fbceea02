//! Start/stop contract for long-running components.

use serde::Serialize;

/// Snapshot of a service's lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub running: bool,
    /// Unix epoch milliseconds of the last successful `start`.
    pub started_at: Option<i64>,
}

/// Long-running component with an explicit lifecycle.
pub trait Service {
    /// Starts the service. Returns `false` if it was already running or
    /// could not be started.
    fn start(&mut self) -> bool;
    /// Stops the service and waits for it to wind down. Returns `false` if
    /// it was not running.
    fn stop(&mut self) -> bool;
    fn status(&self) -> ServiceStatus;
    fn name(&self) -> &str;
}
