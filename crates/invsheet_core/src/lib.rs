//! Core logic for the shared inventory sheet.
//! This crate owns the action vocabulary, both reducers and the store; the
//! CLI only composes them.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod reducer;
pub mod repo;
pub mod service;
pub mod sync;

pub use api::{ApiErrorBody, ApiRequest, ApiResponse, Method, SheetApi};
pub use config::{ConfigError, CoreConfig};
pub use error::ErrorKind;
pub use logging::{default_log_level, Logging, LoggingError};
pub use model::action::{
    Action, ActionEnvelope, ActionError, ActionKind, MemberChanges, MemberRemoval,
    MetadataUpdate, RemovalMode,
};
pub use model::sheet::{
    Item, ItemDraft, ItemId, Member, MemberId, Sheet, SheetId, SheetPatch, SheetSummary,
    ValidationError,
};
pub use reducer::{reduce, reduce_envelope, IdGenerator, RandomIds, SheetState};
pub use repo::sheet_repo::{RepoError, SheetOp, SheetRepository, SqliteSheetRepository};
pub use service::sheet_service::{SheetService, SheetServiceError, WriteMode};
pub use sync::dispatcher::{Dispatch, DispatchCallbacks, SyncDispatcher};
pub use sync::transport::{InProcessTransport, SheetTransport, TransportError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
