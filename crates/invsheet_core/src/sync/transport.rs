//! Client-to-server transport seam.
//!
//! # Responsibility
//! - Define how the dispatcher reaches the server (`SheetTransport`).
//! - Provide an in-process transport that speaks the JSON wire contract to a
//!   [`SheetApi`] without sockets.
//!
//! # Invariants
//! - Any non-2xx response becomes `TransportError::Rejected`.
//! - Failures to reach the handler or to decode its answer become
//!   `TransportError::Network`.

use crate::api::{ApiRequest, ApiResponse, SheetApi};
use crate::error::ErrorKind;
use crate::model::action::ActionEnvelope;
use crate::model::sheet::{Sheet, SheetId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure to complete a client/server round-trip.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server rejected request ({status} {kind}): {message}")]
    Rejected {
        status: u16,
        kind: ErrorKind,
        message: String,
    },
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Rejected { kind, .. } => *kind,
        }
    }
}

/// Request/response channel to the authoritative store.
#[async_trait]
pub trait SheetTransport: Send + Sync {
    /// `GET /sheets/{id}`.
    async fn fetch_sheet(&self, sheet_id: SheetId) -> Result<Sheet, TransportError>;

    /// `PATCH /sheets/{id}` with an action envelope; returns the refreshed
    /// canonical sheet.
    async fn submit_action(
        &self,
        sheet_id: SheetId,
        envelope: &ActionEnvelope,
    ) -> Result<Sheet, TransportError>;
}

/// Transport that hands JSON requests to a local [`SheetApi`] on tokio's
/// blocking pool.
#[derive(Clone)]
pub struct InProcessTransport {
    api: Arc<SheetApi>,
}

impl InProcessTransport {
    pub fn new(api: Arc<SheetApi>) -> Self {
        Self { api }
    }

    async fn round_trip(&self, request: ApiRequest) -> Result<Sheet, TransportError> {
        let api = Arc::clone(&self.api);
        let response = tokio::task::spawn_blocking(move || api.handle(&request))
            .await
            .map_err(|err| TransportError::Network(format!("request worker failed: {err}")))?;
        decode_sheet(response)
    }
}

#[async_trait]
impl SheetTransport for InProcessTransport {
    async fn fetch_sheet(&self, sheet_id: SheetId) -> Result<Sheet, TransportError> {
        self.round_trip(ApiRequest::get(sheet_path(sheet_id))).await
    }

    async fn submit_action(
        &self,
        sheet_id: SheetId,
        envelope: &ActionEnvelope,
    ) -> Result<Sheet, TransportError> {
        let body = serde_json::to_string(envelope)
            .map_err(|err| TransportError::Network(format!("failed to encode action: {err}")))?;
        self.round_trip(ApiRequest::patch(sheet_path(sheet_id), body))
            .await
    }
}

fn sheet_path(sheet_id: SheetId) -> String {
    format!("/sheets/{sheet_id}")
}

fn decode_sheet(response: ApiResponse) -> Result<Sheet, TransportError> {
    if !response.is_success() {
        let (kind, message) = match response.error() {
            Some(detail) => (detail.kind, detail.message),
            None => (ErrorKind::Storage, response.body.to_string()),
        };
        return Err(TransportError::Rejected {
            status: response.status,
            kind,
            message,
        });
    }
    serde_json::from_value(response.body)
        .map_err(|err| TransportError::Network(format!("malformed sheet response: {err}")))
}
