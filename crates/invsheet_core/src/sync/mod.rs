//! Client-side synchronization with the sheet server.
//!
//! # Responsibility
//! - Bridge the pure reducer to the network boundary.
//! - Keep transport details behind the `SheetTransport` seam.

pub mod dispatcher;
pub mod transport;
