//! Optimistic dispatch of sheet actions.
//!
//! # Responsibility
//! - Apply an action to the local view immediately through the pure reducer.
//! - Forward server-bound actions exactly once and run completion callbacks.
//!
//! # Invariants
//! - Local application happens before the request is issued and is never
//!   rolled back on failure; recovery belongs to `on_catch`.
//! - Forwarded envelopes always carry `sendToServer = false`; callbacks are
//!   never part of the forwarded payload.
//! - No retries, no timeouts. Callers wanting bounded latency wrap the
//!   returned `JoinHandle` themselves.
//! - Reconciling with a response clears `is_ahead` even if other requests
//!   are still in flight.

use crate::model::action::{Action, ActionEnvelope, ActionError};
use crate::model::sheet::{Sheet, SheetId};
use crate::reducer::{reduce, IdGenerator, RandomIds, SheetState};
use crate::sync::transport::{SheetTransport, TransportError};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

type OnThen = Box<dyn FnOnce(&Sheet) + Send + 'static>;
type OnCatch = Box<dyn FnOnce(&TransportError) + Send + 'static>;
type OnFinally = Box<dyn FnOnce() + Send + 'static>;

/// Completion callbacks of one server round-trip.
#[derive(Default)]
pub struct DispatchCallbacks {
    on_then: Option<OnThen>,
    on_catch: Option<OnCatch>,
    on_finally: Option<OnFinally>,
}

impl DispatchCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs with the canonical sheet returned by the server.
    pub fn on_then(mut self, f: impl FnOnce(&Sheet) + Send + 'static) -> Self {
        self.on_then = Some(Box::new(f));
        self
    }

    pub fn on_catch(mut self, f: impl FnOnce(&TransportError) + Send + 'static) -> Self {
        self.on_catch = Some(Box::new(f));
        self
    }

    /// Runs after `on_then` or `on_catch`, whatever the outcome.
    pub fn on_finally(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_finally = Some(Box::new(f));
        self
    }

    fn settle(self, outcome: &Result<Sheet, TransportError>) {
        match outcome {
            Ok(sheet) => {
                if let Some(on_then) = self.on_then {
                    on_then(sheet);
                }
            }
            Err(err) => {
                if let Some(on_catch) = self.on_catch {
                    on_catch(err);
                }
            }
        }
        if let Some(on_finally) = self.on_finally {
            on_finally();
        }
    }
}

impl Debug for DispatchCallbacks {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCallbacks")
            .field("on_then", &self.on_then.is_some())
            .field("on_catch", &self.on_catch.is_some())
            .field("on_finally", &self.on_finally.is_some())
            .finish()
    }
}

/// One dispatch call: the action, whether it goes to the server, and the
/// callbacks for that round-trip.
#[derive(Debug)]
pub struct Dispatch {
    pub action: Action,
    pub send_to_server: bool,
    pub callbacks: DispatchCallbacks,
}

impl Dispatch {
    /// Applies locally only; callbacks never run.
    pub fn local(action: Action) -> Self {
        Self {
            action,
            send_to_server: false,
            callbacks: DispatchCallbacks::default(),
        }
    }

    /// Applies locally, then submits to the server.
    pub fn to_server(action: Action) -> Self {
        Self {
            action,
            send_to_server: true,
            callbacks: DispatchCallbacks::default(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: DispatchCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn on_then(mut self, f: impl FnOnce(&Sheet) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_then(f);
        self
    }

    pub fn on_catch(mut self, f: impl FnOnce(&TransportError) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_catch(f);
        self
    }

    pub fn on_finally(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_finally(f);
        self
    }
}

/// Owns one client's view of a sheet and bridges it to the server.
///
/// Cloning is cheap; clones share the same view.
#[derive(Clone)]
pub struct SyncDispatcher {
    state: Arc<RwLock<SheetState>>,
    transport: Arc<dyn SheetTransport>,
    ids: Arc<dyn IdGenerator>,
    runtime: Handle,
}

impl SyncDispatcher {
    /// Creates a dispatcher; submissions are spawned on `runtime`.
    pub fn new(initial: SheetState, transport: Arc<dyn SheetTransport>, runtime: Handle) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            transport,
            ids: Arc::new(RandomIds),
            runtime,
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Snapshot of the current local view.
    pub fn state(&self) -> SheetState {
        self.state.read().clone()
    }

    pub fn sheet_id(&self) -> SheetId {
        self.state.read().sheet.id
    }

    pub fn is_ahead(&self) -> bool {
        self.state.read().is_ahead
    }

    /// Applies the action locally and, when requested, submits it once.
    ///
    /// Returns the handle of the spawned submission (`None` for local-only
    /// dispatches). The local view is already updated when this returns.
    pub fn dispatch(&self, dispatch: Dispatch) -> Option<JoinHandle<()>> {
        let Dispatch {
            action,
            send_to_server,
            callbacks,
        } = dispatch;
        let action = action.with_assigned_ids(self.ids.as_ref());

        let sheet_id = {
            let mut state = self.state.write();
            let next = reduce(&state, &action, self.ids.as_ref());
            *state = next;
            state.sheet.id
        };
        debug!(
            "event=dispatch module=sync status=applied sheet={} kind={} send_to_server={}",
            sheet_id,
            action.kind(),
            send_to_server
        );

        if !send_to_server {
            return None;
        }

        let envelope = action.to_envelope();
        let transport = Arc::clone(&self.transport);
        Some(self.runtime.spawn(async move {
            let started_at = Instant::now();
            let outcome = transport.submit_action(sheet_id, &envelope).await;
            match &outcome {
                Ok(sheet) => info!(
                    "event=dispatch_settle module=sync status=ok sheet={} kind={} version={} duration_ms={}",
                    sheet_id,
                    envelope.kind,
                    sheet.version,
                    started_at.elapsed().as_millis()
                ),
                Err(err) => warn!(
                    "event=dispatch_settle module=sync status=error sheet={} kind={} error_kind={} duration_ms={} error={}",
                    sheet_id,
                    envelope.kind,
                    err.kind(),
                    started_at.elapsed().as_millis(),
                    err
                ),
            }
            callbacks.settle(&outcome);
        }))
    }

    /// Decodes a wire envelope and dispatches it.
    ///
    /// # Errors
    /// - Unknown or malformed actions fail synchronously; nothing is applied
    ///   and nothing is sent.
    pub fn dispatch_envelope(
        &self,
        envelope: &ActionEnvelope,
        callbacks: DispatchCallbacks,
    ) -> Result<Option<JoinHandle<()>>, ActionError> {
        let action = Action::from_envelope(envelope)?;
        Ok(self.dispatch(Dispatch {
            action,
            send_to_server: envelope.send_to_server,
            callbacks,
        }))
    }

    /// Merges a server-confirmed sheet into the local view and clears
    /// `is_ahead`.
    pub fn reconcile(&self, sheet: Sheet) {
        self.dispatch(Dispatch::local(Action::SheetUpdate(sheet.into())));
    }

    /// Fetches the canonical sheet and reconciles with it.
    pub async fn refresh(&self) -> Result<Sheet, TransportError> {
        let sheet = self.transport.fetch_sheet(self.sheet_id()).await?;
        self.reconcile(sheet.clone());
        Ok(sheet)
    }
}
