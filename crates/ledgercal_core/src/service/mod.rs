//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own transaction boundaries for multi-step writes.
//! - Keep CLI/HTTP-style callers decoupled from storage details.

pub mod lifecycle;
pub mod ledger_service;
pub mod prediction_service;
