//! Action vocabulary shared by client and server.
//!
//! # Responsibility
//! - Define the closed set of sheet mutations and their payloads.
//! - Convert between typed actions and the `{type, data, sendToServer}` wire
//!   envelope.
//!
//! # Invariants
//! - An envelope produced by `Action::to_envelope` always carries
//!   `sendToServer = false`.
//! - Unknown `type` strings fail with `ActionError::UnknownKind`, never a
//!   silent no-op.

use crate::error::ErrorKind;
use crate::model::sheet::{Item, ItemDraft, ItemId, Member, MemberId, SheetPatch};
use crate::reducer::IdGenerator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Discriminant of an [`Action`], spelled as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, IntoStaticStr)]
pub enum ActionKind {
    #[strum(serialize = "item_add")]
    ItemAdd,
    #[strum(serialize = "item_remove")]
    ItemRemove,
    #[strum(serialize = "item_update")]
    ItemUpdate,
    #[strum(serialize = "sheet_metadataUpdate")]
    SheetMetadataUpdate,
    #[strum(serialize = "sheet_update")]
    SheetUpdate,
    #[strum(serialize = "sheet_setIsAhead")]
    SheetSetIsAhead,
}

impl ActionKind {
    /// Client-only kinds reconcile local state and are never persisted.
    pub fn is_client_only(self) -> bool {
        matches!(self, Self::SheetUpdate | Self::SheetSetIsAhead)
    }
}

/// What happens to a removed member's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RemovalMode {
    /// Hand every carried item to another member.
    MoveTo { target: MemberId },
    /// Set carried items to unowned.
    #[default]
    Clear,
    /// Keep `carried_by` pointing at the removed id.
    Leave,
    /// Delete every carried item from the sheet.
    DeleteItems,
}

/// One member removal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRemoval {
    pub id: MemberId,
    #[serde(default)]
    pub mode: RemovalMode,
}

impl MemberRemoval {
    pub fn new(id: MemberId, mode: RemovalMode) -> Self {
        Self { id, mode }
    }
}

/// Disjoint member edit lists of a metadata update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemberChanges {
    #[serde(default)]
    pub add: Vec<Member>,
    #[serde(default)]
    pub remove: Vec<MemberRemoval>,
    /// Only `name` and `carry_capacity` are applied; ids are immutable.
    #[serde(default)]
    pub update: Vec<Member>,
}

impl MemberChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.update.is_empty()
    }
}

/// Payload of `sheet_metadataUpdate`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetadataUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub members: MemberChanges,
}

/// A typed sheet mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Action {
    #[serde(rename = "item_add")]
    ItemAdd(ItemDraft),
    #[serde(rename = "item_remove")]
    ItemRemove(ItemId),
    #[serde(rename = "item_update")]
    ItemUpdate(Item),
    #[serde(rename = "sheet_metadataUpdate")]
    SheetMetadataUpdate(MetadataUpdate),
    #[serde(rename = "sheet_update")]
    SheetUpdate(SheetPatch),
    #[serde(rename = "sheet_setIsAhead")]
    SheetSetIsAhead(bool),
}

/// Errors raised while turning a wire envelope into an [`Action`].
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action type `{0}`")]
    UnknownKind(String),
    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: ActionKind,
        #[source]
        source: serde_json::Error,
    },
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownKind(_) => ErrorKind::UnknownAction,
            Self::InvalidPayload { .. } => ErrorKind::Validation,
        }
    }
}

/// Untyped `{type, data, sendToServer}` wire form of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub send_to_server: bool,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::ItemAdd(_) => ActionKind::ItemAdd,
            Self::ItemRemove(_) => ActionKind::ItemRemove,
            Self::ItemUpdate(_) => ActionKind::ItemUpdate,
            Self::SheetMetadataUpdate(_) => ActionKind::SheetMetadataUpdate,
            Self::SheetUpdate(_) => ActionKind::SheetUpdate,
            Self::SheetSetIsAhead(_) => ActionKind::SheetSetIsAhead,
        }
    }

    /// Decodes a wire envelope; `sendToServer` is not part of the action.
    pub fn from_envelope(envelope: &ActionEnvelope) -> Result<Self, ActionError> {
        let kind = ActionKind::from_str(envelope.kind.as_str())
            .map_err(|_| ActionError::UnknownKind(envelope.kind.clone()))?;
        let tagged = serde_json::json!({
            "type": kind.to_string(),
            "data": envelope.data,
        });
        serde_json::from_value(tagged).map_err(|source| ActionError::InvalidPayload { kind, source })
    }

    /// Builds the envelope forwarded to the server.
    pub fn to_envelope(&self) -> ActionEnvelope {
        let data = match serde_json::to_value(self) {
            Ok(Value::Object(mut fields)) => fields.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        ActionEnvelope {
            kind: self.kind().to_string(),
            data,
            send_to_server: false,
        }
    }

    /// Fills the id of an `item_add` draft that does not carry one yet.
    pub fn with_assigned_ids(self, ids: &dyn IdGenerator) -> Self {
        match self {
            Self::ItemAdd(mut draft) => {
                if draft.id.is_none() {
                    draft.id = Some(ids.next_id());
                }
                Self::ItemAdd(draft)
            }
            other => other,
        }
    }
}
