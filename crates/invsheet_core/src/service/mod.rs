//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep the route handler decoupled from storage details.

pub mod sheet_service;
