//! Domain model for the ledger, prediction lifecycle and calendar.
//!
//! # Responsibility
//! - Define canonical records shared by repositories, services and the worker.
//! - Keep validation rules next to the data they protect.
//!
//! # Invariants
//! - Every persisted record is identified by a stable UUID.
//! - Money is integral minor units; no floating point reaches the ledger.

pub mod account;
pub mod event;
pub mod money;
pub mod prediction;
