//! HTTP-shaped route handler for the sheet store.
//!
//! # Responsibility
//! - Map `{method, path, body}` requests onto server reducer calls.
//! - Encode documents and failures as JSON response bodies.
//!
//! # Invariants
//! - Never panics; every failure becomes a status code plus
//!   `{"error": {"kind", "message"}}`.
//! - A PATCH body's `sendToServer` flag is ignored; the server never
//!   re-dispatches an action.
//! - Socket/transport plumbing is out of scope; callers feed requests in.

use crate::error::ErrorKind;
use crate::model::action::{Action, ActionEnvelope};
use crate::model::sheet::SheetId;
use crate::reducer::{IdGenerator, RandomIds};
use crate::repo::sheet_repo::SqliteSheetRepository;
use crate::service::sheet_service::{SheetService, SheetServiceError, WriteMode};
use log::{info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use strum::{Display, EnumString};
use uuid::Uuid;

static SHEET_INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/sheets/?$").expect("valid sheet index regex"));
static SHEET_ROUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/sheets/([^/]+)/?$").expect("valid sheet route regex"));

/// Request methods understood by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    Get,
    Post,
    Patch,
}

/// Incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body.into()),
        }
    }

    pub fn patch(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Patch,
            path: path.into(),
            body: Some(body.into()),
        }
    }
}

/// Outgoing response; `body` is always JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Error body detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiResponse {
    fn json(status: u16, body: impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(err) => Self::failure(
                ErrorKind::Storage,
                format!("failed to encode response: {err}"),
            ),
        }
    }

    fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::failure_with_status(kind.http_status(), kind, message)
    }

    fn failure_with_status(status: u16, kind: ErrorKind, message: impl Into<String>) -> Self {
        let detail = ApiErrorBody {
            kind,
            message: message.into(),
        };
        Self {
            status,
            body: json!({ "error": detail }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the error detail of a failed response.
    pub fn error(&self) -> Option<ApiErrorBody> {
        self.body
            .get("error")
            .and_then(|detail| serde_json::from_value(detail.clone()).ok())
    }
}

#[derive(Debug, Deserialize)]
struct CreateSheetBody {
    name: String,
}

enum Route {
    Index,
    Sheet(SheetId),
}

/// Route handler owning the store connection.
pub struct SheetApi {
    conn: Mutex<Connection>,
    write_mode: WriteMode,
    ids: Arc<dyn IdGenerator>,
}

impl SheetApi {
    /// Wraps a migrated connection (see `db::open_db*`).
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            write_mode: WriteMode::default(),
            ids: Arc::new(RandomIds),
        }
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Handles one request.
    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let started_at = Instant::now();
        let response = self.route(request);
        info!(
            "event=api_request module=api method={} path={} status={} duration_ms={}",
            request.method,
            request.path,
            response.status,
            started_at.elapsed().as_millis()
        );
        response
    }

    fn route(&self, request: &ApiRequest) -> ApiResponse {
        let route = match parse_route(&request.path) {
            Ok(route) => route,
            Err(response) => return response,
        };

        match (route, request.method) {
            (Route::Index, Method::Get) => {
                self.with_service(|service| service.list_sheets().map(|list| (200, list)))
            }
            (Route::Index, Method::Post) => {
                let body: CreateSheetBody = match decode_body(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                self.with_service(|service| service.create_sheet(&body.name).map(|s| (201, s)))
            }
            (Route::Sheet(sheet_id), Method::Get) => {
                self.with_service(|service| service.get_sheet(sheet_id).map(|s| (200, s)))
            }
            (Route::Sheet(sheet_id), Method::Patch) => self.patch_sheet(sheet_id, request),
            (_, method) => ApiResponse::failure_with_status(
                405,
                ErrorKind::Validation,
                format!("method {method} not allowed on {}", request.path),
            ),
        }
    }

    fn patch_sheet(&self, sheet_id: SheetId, request: &ApiRequest) -> ApiResponse {
        let envelope: ActionEnvelope = match decode_body(request) {
            Ok(envelope) => envelope,
            Err(response) => return response,
        };
        if envelope.send_to_server {
            warn!(
                "event=api_patch module=api status=ignored sheet={} reason=send_to_server_set kind={}",
                sheet_id, envelope.kind
            );
        }

        let action = match Action::from_envelope(&envelope) {
            Ok(action) => action,
            Err(err) => return ApiResponse::failure(err.kind(), err.to_string()),
        };

        self.with_service(|service| service.apply_and_fetch(sheet_id, &action).map(|s| (200, s)))
    }

    fn with_service<T: Serialize>(
        &self,
        f: impl FnOnce(&SheetService<SqliteSheetRepository<'_>>) -> Result<(u16, T), SheetServiceError>,
    ) -> ApiResponse {
        let conn = self.conn.lock();
        let repo = match SqliteSheetRepository::try_new(&conn) {
            Ok(repo) => repo,
            Err(err) => return ApiResponse::failure(err.kind(), err.to_string()),
        };
        let service = SheetService::new(repo)
            .with_write_mode(self.write_mode)
            .with_id_generator(Arc::clone(&self.ids));

        match f(&service) {
            Ok((status, body)) => ApiResponse::json(status, body),
            Err(err) => ApiResponse::failure(err.kind(), err.to_string()),
        }
    }
}

fn parse_route(path: &str) -> Result<Route, ApiResponse> {
    if SHEET_INDEX_RE.is_match(path) {
        return Ok(Route::Index);
    }
    let Some(captures) = SHEET_ROUTE_RE.captures(path) else {
        return Err(ApiResponse::failure(
            ErrorKind::NotFound,
            format!("no route for `{path}`"),
        ));
    };
    let raw_id = &captures[1];
    Uuid::parse_str(raw_id).map(Route::Sheet).map_err(|_| {
        ApiResponse::failure(ErrorKind::Validation, format!("invalid sheet id `{raw_id}`"))
    })
}

fn decode_body<T: for<'de> Deserialize<'de>>(request: &ApiRequest) -> Result<T, ApiResponse> {
    let raw = request.body.as_deref().unwrap_or_default();
    serde_json::from_str(raw).map_err(|err| {
        ApiResponse::failure(ErrorKind::Validation, format!("malformed request body: {err}"))
    })
}
