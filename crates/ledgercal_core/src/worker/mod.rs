//! Task worker: the single consumer of the prediction queue.
//!
//! # Responsibility
//! - Validate, parse and persist one task at a time.
//! - Materialize create-event results on the owner's calendar.
//! - Run the loop in the background under the `Service` lifecycle.
//!
//! # Invariants
//! - At most one delivery is in flight per worker.
//! - A delivery is acknowledged only after its database writes commit.
//! - Any failure drops the delivery (nack without requeue).

pub mod runner;
pub mod task_worker;

pub use runner::WorkerService;
pub use task_worker::{TaskWorker, WorkerError, WorkerOutcome};
