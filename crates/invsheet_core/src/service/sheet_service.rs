//! Server-side sheet reducer.
//!
//! # Responsibility
//! - Translate an [`Action`] into minimal field-scoped [`SheetOp`] writes.
//! - Apply those writes through a [`SheetRepository`] in the configured
//!   [`WriteMode`] and report the outcome per sub-operation.
//!
//! # Invariants
//! - Planning is pure: it validates payloads but never touches storage.
//! - Client-only actions (`sheet_update`, `sheet_setIsAhead`) are rejected.
//! - In `PerOperation` mode a mixed outcome is always reported as
//!   `PartialApplication`; nothing is rolled back.

use crate::error::ErrorKind;
use crate::model::action::{Action, MemberChanges, MetadataUpdate, RemovalMode};
use crate::model::sheet::{
    normalize_sheet_name, EntityKind, Sheet, SheetId, SheetSummary, ValidationError,
};
use crate::reducer::{IdGenerator, RandomIds};
use crate::repo::sheet_repo::{RepoError, SheetOp, SheetRepository};
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

/// How the ops of one action reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum WriteMode {
    /// All ops of an action commit or roll back together.
    #[default]
    Atomic,
    /// Each op is its own transaction; failures are aggregated.
    PerOperation,
}

/// One failed sub-operation of a partially applied action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpFailure {
    /// Position of the op in the planned list.
    pub index: usize,
    pub op: &'static str,
    pub kind: ErrorKind,
    pub message: String,
}

/// Errors from server reducer operations.
#[derive(Debug, Error)]
pub enum SheetServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: Uuid },
    #[error("{applied} of {total} sub-operations applied; failed: {}", describe_failures(.failures))]
    PartialApplication {
        applied: usize,
        total: usize,
        failures: Vec<OpFailure>,
    },
    #[error("inconsistent sheet state: {0}")]
    InconsistentState(&'static str),
    #[error(transparent)]
    Repo(RepoError),
}

impl SheetServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PartialApplication { .. } => ErrorKind::PartialApplication,
            Self::InconsistentState(_) => ErrorKind::Storage,
            Self::Repo(err) => err.kind(),
        }
    }
}

impl From<RepoError> for SheetServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, SheetServiceError>;

/// Server reducer facade over repository implementations.
pub struct SheetService<R: SheetRepository> {
    repo: R,
    write_mode: WriteMode,
    ids: Arc<dyn IdGenerator>,
}

impl<R: SheetRepository> SheetService<R> {
    /// Creates a service with atomic writes and random ids.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
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

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Creates an empty sheet and returns the persisted document.
    pub fn create_sheet(&self, name: &str) -> ServiceResult<Sheet> {
        let sheet = Sheet::new(self.ids.next_id(), normalize_sheet_name(name)?);
        let sheet_id = self.repo.create_sheet(&sheet)?;
        info!("event=sheet_create module=service status=ok sheet={sheet_id}");
        self.repo
            .get_sheet(sheet_id)?
            .ok_or(SheetServiceError::InconsistentState(
                "created sheet not found in read-back",
            ))
    }

    /// Gets one sheet document.
    ///
    /// # Errors
    /// - `NotFound` when the sheet does not exist.
    pub fn get_sheet(&self, sheet_id: SheetId) -> ServiceResult<Sheet> {
        self.repo
            .get_sheet(sheet_id)?
            .ok_or(SheetServiceError::NotFound {
                entity: EntityKind::Sheet,
                id: sheet_id,
            })
    }

    pub fn list_sheets(&self) -> ServiceResult<Vec<SheetSummary>> {
        Ok(self.repo.list_sheets()?)
    }

    /// Applies one action to the stored sheet and returns the new version.
    ///
    /// # Errors
    /// - `Validation` for malformed payloads or client-only actions.
    /// - `NotFound` when the sheet or a referenced item/member is absent.
    /// - `PartialApplication` (per-operation mode only) for mixed outcomes.
    pub fn apply_action(&self, sheet_id: SheetId, action: &Action) -> ServiceResult<u64> {
        let started_at = Instant::now();
        let kind = action.kind();
        let ops = plan_action(action, self.ids.as_ref())?;

        let result = if ops.is_empty() {
            self.get_sheet(sheet_id).map(|sheet| sheet.version)
        } else {
            match self.write_mode {
                WriteMode::Atomic => self.repo.apply_ops(sheet_id, &ops).map_err(Into::into),
                WriteMode::PerOperation => self.apply_each(sheet_id, &ops),
            }
        };

        match &result {
            Ok(version) => info!(
                "event=server_reduce module=service status=ok sheet={} kind={} ops={} mode={} version={} duration_ms={}",
                sheet_id,
                kind,
                ops.len(),
                self.write_mode,
                version,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=server_reduce module=service status=error sheet={} kind={} ops={} mode={} error_kind={} error={}",
                sheet_id,
                kind,
                ops.len(),
                self.write_mode,
                err.kind(),
                err
            ),
        }
        result
    }

    /// Applies the action, then reads back the canonical document.
    pub fn apply_and_fetch(&self, sheet_id: SheetId, action: &Action) -> ServiceResult<Sheet> {
        self.apply_action(sheet_id, action)?;
        self.get_sheet(sheet_id)
    }

    fn apply_each(&self, sheet_id: SheetId, ops: &[SheetOp]) -> ServiceResult<u64> {
        let mut applied = 0;
        let mut last_version = None;
        let mut failures = Vec::new();
        let mut first_error = None;

        for (index, op) in ops.iter().enumerate() {
            match self.repo.apply_op(sheet_id, op) {
                Ok(version) => {
                    applied += 1;
                    last_version = Some(version);
                }
                Err(err) => {
                    failures.push(OpFailure {
                        index,
                        op: op.label(),
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                    first_error.get_or_insert(err);
                }
            }
        }

        match (first_error, last_version) {
            (None, Some(version)) => Ok(version),
            (Some(err), None) => Err(err.into()),
            (Some(_), Some(_)) => Err(SheetServiceError::PartialApplication {
                applied,
                total: ops.len(),
                failures,
            }),
            (None, None) => Err(SheetServiceError::InconsistentState(
                "no sub-operation outcome recorded",
            )),
        }
    }
}

/// Translates an action into the field-scoped writes that persist it.
///
/// `item_add` drafts without an id get one from `ids`.
pub fn plan_action(action: &Action, ids: &dyn IdGenerator) -> Result<Vec<SheetOp>, ValidationError> {
    match action {
        Action::ItemAdd(draft) => {
            let fallback = draft.id.unwrap_or_else(|| ids.next_id());
            let item = draft.clone().into_item(fallback);
            item.validate()?;
            Ok(vec![SheetOp::PushItem(item)])
        }
        Action::ItemRemove(item_id) => Ok(vec![SheetOp::PullItem(*item_id)]),
        Action::ItemUpdate(item) => {
            item.validate()?;
            Ok(vec![SheetOp::SetItemFields(item.clone())])
        }
        Action::SheetMetadataUpdate(update) => plan_metadata(update),
        Action::SheetUpdate(_) | Action::SheetSetIsAhead(_) => {
            Err(ValidationError::ClientOnlyAction(action.kind().into()))
        }
    }
}

fn plan_metadata(update: &MetadataUpdate) -> Result<Vec<SheetOp>, ValidationError> {
    let mut ops = Vec::new();

    if let Some(name) = &update.name {
        ops.push(SheetOp::SetName(normalize_sheet_name(name)?));
    }
    plan_member_changes(&update.members, &mut ops)?;

    Ok(ops)
}

fn plan_member_changes(
    changes: &MemberChanges,
    ops: &mut Vec<SheetOp>,
) -> Result<(), ValidationError> {
    if !changes.add.is_empty() {
        for member in &changes.add {
            member.validate()?;
        }
        ops.push(SheetOp::PushMembers(changes.add.clone()));
    }

    if !changes.remove.is_empty() {
        let removed: HashSet<Uuid> = changes.remove.iter().map(|removal| removal.id).collect();
        for removal in &changes.remove {
            match removal.mode {
                RemovalMode::MoveTo { target } => {
                    if removed.contains(&target) {
                        return Err(ValidationError::MoveTargetRemoved {
                            member: removal.id,
                            target,
                        });
                    }
                    ops.push(SheetOp::ReassignCarrier {
                        from: removal.id,
                        to: Some(target),
                    });
                }
                RemovalMode::Clear => ops.push(SheetOp::ReassignCarrier {
                    from: removal.id,
                    to: None,
                }),
                RemovalMode::DeleteItems => ops.push(SheetOp::PullItemsCarriedBy(removal.id)),
                RemovalMode::Leave => {}
            }
        }
        ops.push(SheetOp::PullMembers(
            changes.remove.iter().map(|removal| removal.id).collect(),
        ));
    }

    for member in &changes.update {
        member.validate()?;
        ops.push(SheetOp::SetMemberFields(member.clone()));
    }

    Ok(())
}

fn describe_failures(failures: &[OpFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("#{} {} ({})", failure.index, failure.op, failure.message))
        .collect::<Vec<_>>()
        .join(", ")
}
