//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the sheet persistence contract used by the server reducer.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Writes are field-scoped ops; whole-document overwrites do not exist.
//! - Repository APIs return semantic errors (`NotFound`, `Validation`) in
//!   addition to DB transport errors.

pub mod sheet_repo;
