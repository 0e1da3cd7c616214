//! Sheet domain model and action vocabulary.
//!
//! # Responsibility
//! - Define the persisted sheet document and its entities.
//! - Define the typed actions exchanged between client and server.
//!
//! # Invariants
//! - Every entity is identified by a stable UUID assigned at creation.
//! - The divergence flag is not part of the persisted shape.

pub mod action;
pub mod sheet;
