//! Sheet aggregate model.
//!
//! # Responsibility
//! - Define the persisted document shape (`Sheet`, `Item`, `Member`).
//! - Provide validation and read helpers shared by client and server.
//!
//! # Invariants
//! - Entity ids are assigned once and never change.
//! - `version` is server-authoritative; clients only copy it.
//! - `carried_by = None` is the unowned case; on the wire it is `"unowned"`.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;
use uuid::Uuid;

pub type SheetId = Uuid;
pub type ItemId = Uuid;
pub type MemberId = Uuid;

/// Maximum sheet name length in characters.
pub const SHEET_NAME_MAX_CHARS: usize = 24;

/// Wire spelling of an item with no carrier.
pub const UNOWNED_WIRE_VALUE: &str = "unowned";

/// Entity class used by not-found and duplicate-id errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Sheet,
    Item,
    Member,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Sheet => "sheet",
            Self::Item => "item",
            Self::Member => "member",
        };
        f.write_str(label)
    }
}

/// Validation failures for sheet documents and action payloads.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("sheet name must not be blank")]
    BlankSheetName,
    #[error("sheet name is {actual} characters; max is {max}")]
    SheetNameTooLong { actual: usize, max: usize },
    #[error("item name must not be blank")]
    BlankItemName,
    #[error("member name must not be blank")]
    BlankMemberName,
    #[error("`{field}` must be a finite, non-negative number, got {value}")]
    InvalidNumber { field: &'static str, value: f64 },
    #[error("{entity} id already exists: {id}")]
    DuplicateId { entity: EntityKind, id: Uuid },
    #[error("member {member} cannot hand items to {target}, which is removed in the same update")]
    MoveTargetRemoved { member: MemberId, target: MemberId },
    #[error("action `{0}` is client-only and cannot be persisted")]
    ClientOnlyAction(&'static str),
}

/// Party member who may carry items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    #[serde(default)]
    pub carry_capacity: f64,
}

impl Member {
    /// Creates a member with a generated id.
    pub fn new(name: impl Into<String>, carry_capacity: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            carry_capacity,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::BlankMemberName);
        }
        check_amount("carryCapacity", self.carry_capacity)
    }
}

/// One inventory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    /// External reference URI.
    #[serde(default)]
    pub reference: String,
    #[serde(default, with = "carrier")]
    pub carried_by: Option<MemberId>,
}

impl Item {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::BlankItemName);
        }
        check_amount("weight", self.weight)?;
        check_amount("value", self.value)
    }

    /// Weight of the whole stack (`weight * quantity`).
    pub fn total_weight(&self) -> f64 {
        self.weight * f64::from(self.quantity)
    }
}

/// Creation fields for a new item.
///
/// `id` is normally absent; the dispatcher fills it before the action is
/// reduced so client and server agree on the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,
    pub name: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default, with = "carrier")]
    pub carried_by: Option<MemberId>,
}

impl ItemDraft {
    /// Creates a draft with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            weight: 0.0,
            quantity: default_quantity(),
            value: 0.0,
            description: String::new(),
            category: String::new(),
            reference: String::new(),
            carried_by: None,
        }
    }

    /// Builds the item, keeping a pre-assigned id when present.
    pub fn into_item(self, fallback_id: ItemId) -> Item {
        Item {
            id: self.id.unwrap_or(fallback_id),
            name: self.name,
            weight: self.weight,
            quantity: self.quantity,
            value: self.value,
            description: self.description,
            category: self.category,
            reference: self.reference,
            carried_by: self.carried_by,
        }
    }
}

/// Persisted sheet document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: SheetId,
    pub name: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub version: u64,
}

impl Sheet {
    /// Creates an empty sheet at version 0.
    pub fn new(id: SheetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            items: Vec::new(),
            members: Vec::new(),
            version: 0,
        }
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|member| member.id == id)
    }

    pub fn has_member(&self, id: MemberId) -> bool {
        self.member(id).is_some()
    }

    /// Resolves an item's carrier, treating references to absent members as
    /// unowned.
    pub fn carrier_of(&self, item: &Item) -> Option<&Member> {
        item.carried_by.and_then(|id| self.member(id))
    }

    pub fn items_carried_by(&self, member: MemberId) -> impl Iterator<Item = &Item> {
        self.items
            .iter()
            .filter(move |item| item.carried_by == Some(member))
    }

    /// Sum of `weight * quantity` over the member's items.
    pub fn carried_weight(&self, member: MemberId) -> f64 {
        self.items_carried_by(member).map(Item::total_weight).sum()
    }

    /// Returns whether the member carries more than their capacity.
    ///
    /// Unknown members are never over capacity.
    pub fn is_over_capacity(&self, member: MemberId) -> bool {
        self.member(member)
            .is_some_and(|found| self.carried_weight(member) > found.carry_capacity)
    }

    /// Items whose `carried_by` names a member that is not on this sheet.
    ///
    /// Only produced by the `leave` member-removal mode.
    pub fn dangling_items(&self) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|item| item.carried_by.is_some_and(|id| !self.has_member(id)))
            .collect()
    }
}

/// Validates and normalizes a sheet name (trimmed, non-blank, bounded).
pub fn normalize_sheet_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankSheetName);
    }
    let actual = trimmed.chars().count();
    if actual > SHEET_NAME_MAX_CHARS {
        return Err(ValidationError::SheetNameTooLong {
            actual,
            max: SHEET_NAME_MAX_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Partial sheet used to merge server-confirmed state into a client view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SheetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Member>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl From<Sheet> for SheetPatch {
    fn from(sheet: Sheet) -> Self {
        Self {
            id: Some(sheet.id),
            name: Some(sheet.name),
            items: Some(sheet.items),
            members: Some(sheet.members),
            version: Some(sheet.version),
        }
    }
}

/// Listing row for the sheet index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSummary {
    pub id: SheetId,
    pub name: String,
    pub version: u64,
    pub item_count: u32,
    pub member_count: u32,
}

fn default_quantity() -> u32 {
    1
}

fn check_amount(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidNumber { field, value })
    }
}

/// Serde adapter mapping `Option<MemberId>` to the `"unowned"` wire sentinel.
pub(crate) mod carrier {
    use super::{MemberId, UNOWNED_WIRE_VALUE};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(
        value: &Option<MemberId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.collect_str(id),
            None => serializer.serialize_str(UNOWNED_WIRE_VALUE),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<MemberId>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let trimmed = raw.trim();
        // "Nobody" is the legacy spelling still found in older documents.
        if trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case(UNOWNED_WIRE_VALUE)
            || trimmed.eq_ignore_ascii_case("nobody")
        {
            return Ok(None);
        }
        Uuid::parse_str(trimmed)
            .map(Some)
            .map_err(|err| D::Error::custom(format!("invalid carriedBy `{trimmed}`: {err}")))
    }
}
