//! Client-side sheet reducer.
//!
//! # Responsibility
//! - Compute the next local sheet view from the current view and an action.
//! - Mark the view as ahead of the server when a mutation is speculative.
//!
//! # Invariants
//! - `reduce` never mutates its input and performs no I/O.
//! - Id generation is injected through [`IdGenerator`]; given the same state,
//!   action and pre-assigned ids, the output is identical.
//! - `sheet_update` is the only kind that clears `is_ahead` implicitly.

use crate::model::action::{
    Action, ActionEnvelope, ActionError, MemberChanges, MetadataUpdate, RemovalMode,
};
use crate::model::sheet::{Item, ItemDraft, ItemId, Sheet, SheetPatch};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source of fresh entity ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Random UUID v4 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Client view of a sheet: the document plus the divergence flag.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetState {
    #[serde(flatten)]
    pub sheet: Sheet,
    /// True while local mutations are not confirmed by the server.
    #[serde(default)]
    pub is_ahead: bool,
}

impl SheetState {
    /// Wraps a server-confirmed sheet.
    pub fn confirmed(sheet: Sheet) -> Self {
        Self {
            sheet,
            is_ahead: false,
        }
    }
}

/// Applies one action to the client view.
pub fn reduce(state: &SheetState, action: &Action, ids: &dyn IdGenerator) -> SheetState {
    match action {
        Action::ItemAdd(draft) => speculative(state, |sheet| {
            sheet.items.push(build_item(draft, ids));
        }),
        Action::ItemRemove(id) => speculative(state, |sheet| remove_item(sheet, *id)),
        Action::ItemUpdate(item) => speculative(state, |sheet| replace_item(sheet, item)),
        Action::SheetMetadataUpdate(update) => {
            speculative(state, |sheet| apply_metadata(sheet, update))
        }
        Action::SheetUpdate(patch) => SheetState {
            sheet: merge_patch(&state.sheet, patch),
            is_ahead: false,
        },
        Action::SheetSetIsAhead(is_ahead) => SheetState {
            sheet: state.sheet.clone(),
            is_ahead: *is_ahead,
        },
    }
}

/// Decodes a wire envelope and applies it.
///
/// # Errors
/// - `ActionError::UnknownKind` for an unrecognised `type`.
/// - `ActionError::InvalidPayload` when `data` does not fit the kind.
pub fn reduce_envelope(
    state: &SheetState,
    envelope: &ActionEnvelope,
    ids: &dyn IdGenerator,
) -> Result<SheetState, ActionError> {
    let action = Action::from_envelope(envelope)?;
    Ok(reduce(state, &action, ids))
}

fn speculative(state: &SheetState, mutation: impl FnOnce(&mut Sheet)) -> SheetState {
    let mut sheet = state.sheet.clone();
    mutation(&mut sheet);
    SheetState {
        sheet,
        is_ahead: true,
    }
}

fn build_item(draft: &ItemDraft, ids: &dyn IdGenerator) -> Item {
    let fallback = match draft.id {
        Some(id) => id,
        None => ids.next_id(),
    };
    draft.clone().into_item(fallback)
}

fn remove_item(sheet: &mut Sheet, id: ItemId) {
    sheet.items.retain(|item| item.id != id);
}

fn replace_item(sheet: &mut Sheet, replacement: &Item) {
    if let Some(slot) = sheet.items.iter_mut().find(|item| item.id == replacement.id) {
        *slot = replacement.clone();
    }
}

fn apply_metadata(sheet: &mut Sheet, update: &MetadataUpdate) {
    if let Some(name) = &update.name {
        sheet.name = name.clone();
    }
    apply_member_changes(sheet, &update.members);
}

/// Same order as the server: add, remove, then update.
fn apply_member_changes(sheet: &mut Sheet, changes: &MemberChanges) {
    for member in &changes.add {
        if !sheet.has_member(member.id) {
            sheet.members.push(member.clone());
        }
    }

    for removal in &changes.remove {
        let removed = removal.id;
        match removal.mode {
            RemovalMode::MoveTo { target } => reassign(sheet, removed, Some(target)),
            RemovalMode::Clear => reassign(sheet, removed, None),
            RemovalMode::Leave => {}
            RemovalMode::DeleteItems => sheet
                .items
                .retain(|item| item.carried_by != Some(removed)),
        }
        sheet.members.retain(|member| member.id != removed);
    }

    for updated in &changes.update {
        if let Some(member) = sheet.members.iter_mut().find(|m| m.id == updated.id) {
            member.name = updated.name.clone();
            member.carry_capacity = updated.carry_capacity;
        }
    }
}

fn reassign(sheet: &mut Sheet, from: Uuid, to: Option<Uuid>) {
    for item in sheet
        .items
        .iter_mut()
        .filter(|item| item.carried_by == Some(from))
    {
        item.carried_by = to;
    }
}

/// Field-by-field merge, patch values win.
fn merge_patch(current: &Sheet, patch: &SheetPatch) -> Sheet {
    Sheet {
        id: patch.id.unwrap_or(current.id),
        name: patch.name.clone().unwrap_or_else(|| current.name.clone()),
        items: patch.items.clone().unwrap_or_else(|| current.items.clone()),
        members: patch
            .members
            .clone()
            .unwrap_or_else(|| current.members.clone()),
        version: patch.version.unwrap_or(current.version),
    }
}
