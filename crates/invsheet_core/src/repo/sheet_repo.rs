//! Sheet repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist sheets as normalized rows (`sheets`, `sheet_members`,
//!   `sheet_items`) and read them back as documents.
//! - Apply field-scoped [`SheetOp`] writes instead of whole-document saves.
//!
//! # Invariants
//! - Every accepted op bumps `sheets.version` by exactly one, inside the same
//!   transaction as the op itself.
//! - Item/member list order is the insertion order (`sort_order`).
//! - Write paths validate entities before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::error::ErrorKind;
use crate::model::sheet::{
    normalize_sheet_name, EntityKind, Item, ItemId, Member, MemberId, Sheet, SheetId,
    SheetSummary, ValidationError,
};
use log::{debug, error};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

const TOUCH_SHEET_SQL: &str = "UPDATE sheets
     SET
        version = version + 1,
        updated_at = (strftime('%s', 'now') * 1000)
     WHERE uuid = ?1;";

const ITEM_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    weight,
    quantity,
    value,
    description,
    category,
    reference,
    carried_by
FROM sheet_items";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for sheet persistence and query operations.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: Uuid },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid persisted sheet data: {0}")]
    InvalidData(String),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Db(_) | Self::InvalidData(_) => ErrorKind::Storage,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    fn not_found(entity: EntityKind, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One field-scoped persisted write.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetOp {
    SetName(String),
    PushItem(Item),
    PullItem(ItemId),
    /// Rewrites every item field except the id.
    SetItemFields(Item),
    PushMembers(Vec<Member>),
    /// Moves items from one carrier to another (`None` = unowned).
    ReassignCarrier {
        from: MemberId,
        to: Option<MemberId>,
    },
    PullItemsCarriedBy(MemberId),
    PullMembers(Vec<MemberId>),
    /// Rewrites `name` and `carry_capacity` only.
    SetMemberFields(Member),
}

impl SheetOp {
    /// Stable label used in logs and partial-application reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SetName(_) => "set_name",
            Self::PushItem(_) => "push_item",
            Self::PullItem(_) => "pull_item",
            Self::SetItemFields(_) => "set_item_fields",
            Self::PushMembers(_) => "push_members",
            Self::ReassignCarrier { .. } => "reassign_carrier",
            Self::PullItemsCarriedBy(_) => "pull_items_carried_by",
            Self::PullMembers(_) => "pull_members",
            Self::SetMemberFields(_) => "set_member_fields",
        }
    }
}

/// Repository interface for sheet persistence.
pub trait SheetRepository {
    /// Inserts a new sheet document with its current version.
    fn create_sheet(&self, sheet: &Sheet) -> RepoResult<SheetId>;
    fn get_sheet(&self, id: SheetId) -> RepoResult<Option<Sheet>>;
    /// Lists sheets ordered by most recently updated first.
    fn list_sheets(&self) -> RepoResult<Vec<SheetSummary>>;
    /// Applies one op in its own transaction; returns the new version.
    fn apply_op(&self, sheet_id: SheetId, op: &SheetOp) -> RepoResult<u64>;
    /// Applies all ops in one transaction; returns the new version.
    ///
    /// Any failing op rolls back every op of the batch.
    fn apply_ops(&self, sheet_id: SheetId, ops: &[SheetOp]) -> RepoResult<u64>;
}

/// SQLite-backed sheet repository.
pub struct SqliteSheetRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSheetRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    ///
    /// # Errors
    /// - `InvalidData` when the connection schema is not at the latest
    ///   migration (use `db::open_db*` to obtain connections).
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if version != latest_version() {
            return Err(RepoError::InvalidData(format!(
                "connection schema version {version} does not match expected {}",
                latest_version()
            )));
        }
        Ok(Self { conn })
    }
}

impl SheetRepository for SqliteSheetRepository<'_> {
    fn create_sheet(&self, sheet: &Sheet) -> RepoResult<SheetId> {
        let name = normalize_sheet_name(&sheet.name)?;
        if sheet_exists(self.conn, sheet.id)? {
            return Err(ValidationError::DuplicateId {
                entity: EntityKind::Sheet,
                id: sheet.id,
            }
            .into());
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO sheets (uuid, name, version) VALUES (?1, ?2, ?3);",
            params![sheet.id.to_string(), name, version_to_db(sheet.version)?],
        )?;
        insert_members(&tx, sheet.id, &sheet.members)?;
        for item in &sheet.items {
            insert_item(&tx, sheet.id, item)?;
        }
        tx.commit()?;

        Ok(sheet.id)
    }

    fn get_sheet(&self, id: SheetId) -> RepoResult<Option<Sheet>> {
        let header = self
            .conn
            .query_row(
                "SELECT name, version FROM sheets WHERE uuid = ?1;",
                [id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((name, version)) = header else {
            return Ok(None);
        };

        Ok(Some(Sheet {
            id,
            name,
            items: load_items(self.conn, id)?,
            members: load_members(self.conn, id)?,
            version: version_from_db(version)?,
        }))
    }

    fn list_sheets(&self) -> RepoResult<Vec<SheetSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                s.uuid,
                s.name,
                s.version,
                (SELECT COUNT(*) FROM sheet_items i WHERE i.sheet_uuid = s.uuid),
                (SELECT COUNT(*) FROM sheet_members m WHERE m.sheet_uuid = s.uuid)
             FROM sheets s
             ORDER BY s.updated_at DESC, s.uuid ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut summaries = Vec::new();

        while let Some(row) = rows.next()? {
            let uuid_text: String = row.get(0)?;
            summaries.push(SheetSummary {
                id: parse_uuid(&uuid_text, "sheets.uuid")?,
                name: row.get(1)?,
                version: version_from_db(row.get(2)?)?,
                item_count: count_from_db(row.get(3)?)?,
                member_count: count_from_db(row.get(4)?)?,
            });
        }

        Ok(summaries)
    }

    fn apply_op(&self, sheet_id: SheetId, op: &SheetOp) -> RepoResult<u64> {
        self.apply_ops(sheet_id, std::slice::from_ref(op))
    }

    fn apply_ops(&self, sheet_id: SheetId, ops: &[SheetOp]) -> RepoResult<u64> {
        let started_at = Instant::now();
        let tx = self.conn.unchecked_transaction()?;
        for op in ops {
            if let Err(err) = touch_sheet(&tx, sheet_id).and_then(|()| write_op(&tx, sheet_id, op))
            {
                error!(
                    "event=sheet_write module=repo status=error sheet={} op={} duration_ms={} error={}",
                    sheet_id,
                    op.label(),
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        }
        let version = current_version(&tx, sheet_id)?;
        tx.commit()?;

        debug!(
            "event=sheet_write module=repo status=ok sheet={} ops={} version={} duration_ms={}",
            sheet_id,
            ops.len(),
            version,
            started_at.elapsed().as_millis()
        );
        Ok(version)
    }
}

fn touch_sheet(conn: &Connection, sheet_id: SheetId) -> RepoResult<()> {
    let changed = conn.execute(TOUCH_SHEET_SQL, [sheet_id.to_string()])?;
    if changed == 0 {
        return Err(RepoError::not_found(EntityKind::Sheet, sheet_id));
    }
    Ok(())
}

fn write_op(conn: &Connection, sheet_id: SheetId, op: &SheetOp) -> RepoResult<()> {
    let sheet = sheet_id.to_string();
    match op {
        SheetOp::SetName(name) => {
            let name = normalize_sheet_name(name)?;
            conn.execute(
                "UPDATE sheets SET name = ?2 WHERE uuid = ?1;",
                params![sheet, name],
            )?;
        }
        SheetOp::PushItem(item) => {
            if item_exists(conn, sheet_id, item.id)? {
                return Err(ValidationError::DuplicateId {
                    entity: EntityKind::Item,
                    id: item.id,
                }
                .into());
            }
            insert_item(conn, sheet_id, item)?;
        }
        SheetOp::PullItem(item_id) => {
            let changed = conn.execute(
                "DELETE FROM sheet_items WHERE sheet_uuid = ?1 AND uuid = ?2;",
                params![sheet, item_id.to_string()],
            )?;
            if changed == 0 {
                return Err(RepoError::not_found(EntityKind::Item, *item_id));
            }
        }
        SheetOp::SetItemFields(item) => {
            item.validate()?;
            ensure_carrier(conn, sheet_id, item.carried_by)?;
            let changed = conn.execute(
                "UPDATE sheet_items
                 SET
                    name = ?3,
                    weight = ?4,
                    quantity = ?5,
                    value = ?6,
                    description = ?7,
                    category = ?8,
                    reference = ?9,
                    carried_by = ?10
                 WHERE sheet_uuid = ?1 AND uuid = ?2;",
                params![
                    sheet,
                    item.id.to_string(),
                    item.name.as_str(),
                    item.weight,
                    i64::from(item.quantity),
                    item.value,
                    item.description.as_str(),
                    item.category.as_str(),
                    item.reference.as_str(),
                    item.carried_by.map(|id| id.to_string()),
                ],
            )?;
            if changed == 0 {
                return Err(RepoError::not_found(EntityKind::Item, item.id));
            }
        }
        SheetOp::PushMembers(members) => insert_members(conn, sheet_id, members)?,
        SheetOp::ReassignCarrier { from, to } => {
            ensure_carrier(conn, sheet_id, *to)?;
            conn.execute(
                "UPDATE sheet_items SET carried_by = ?3 WHERE sheet_uuid = ?1 AND carried_by = ?2;",
                params![sheet, from.to_string(), to.map(|id| id.to_string())],
            )?;
        }
        SheetOp::PullItemsCarriedBy(member_id) => {
            conn.execute(
                "DELETE FROM sheet_items WHERE sheet_uuid = ?1 AND carried_by = ?2;",
                params![sheet, member_id.to_string()],
            )?;
        }
        SheetOp::PullMembers(member_ids) => {
            for member_id in member_ids {
                let changed = conn.execute(
                    "DELETE FROM sheet_members WHERE sheet_uuid = ?1 AND uuid = ?2;",
                    params![sheet, member_id.to_string()],
                )?;
                if changed == 0 {
                    return Err(RepoError::not_found(EntityKind::Member, *member_id));
                }
            }
        }
        SheetOp::SetMemberFields(member) => {
            member.validate()?;
            let changed = conn.execute(
                "UPDATE sheet_members
                 SET
                    name = ?3,
                    carry_capacity = ?4
                 WHERE sheet_uuid = ?1 AND uuid = ?2;",
                params![
                    sheet,
                    member.id.to_string(),
                    member.name.as_str(),
                    member.carry_capacity
                ],
            )?;
            if changed == 0 {
                return Err(RepoError::not_found(EntityKind::Member, member.id));
            }
        }
    }
    Ok(())
}

fn insert_item(conn: &Connection, sheet_id: SheetId, item: &Item) -> RepoResult<()> {
    item.validate()?;
    ensure_carrier(conn, sheet_id, item.carried_by)?;
    conn.execute(
        "INSERT INTO sheet_items (
            sheet_uuid,
            uuid,
            sort_order,
            name,
            weight,
            quantity,
            value,
            description,
            category,
            reference,
            carried_by
        ) VALUES (
            ?1,
            ?2,
            (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM sheet_items WHERE sheet_uuid = ?1),
            ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
        );",
        params![
            sheet_id.to_string(),
            item.id.to_string(),
            item.name.as_str(),
            item.weight,
            i64::from(item.quantity),
            item.value,
            item.description.as_str(),
            item.category.as_str(),
            item.reference.as_str(),
            item.carried_by.map(|id| id.to_string()),
        ],
    )?;
    Ok(())
}

fn insert_members(conn: &Connection, sheet_id: SheetId, members: &[Member]) -> RepoResult<()> {
    for (index, member) in members.iter().enumerate() {
        member.validate()?;
        let repeated_in_batch = members[..index].iter().any(|m| m.id == member.id);
        if repeated_in_batch || member_exists(conn, sheet_id, member.id)? {
            return Err(ValidationError::DuplicateId {
                entity: EntityKind::Member,
                id: member.id,
            }
            .into());
        }
        conn.execute(
            "INSERT INTO sheet_members (sheet_uuid, uuid, sort_order, name, carry_capacity)
             VALUES (
                ?1,
                ?2,
                (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM sheet_members WHERE sheet_uuid = ?1),
                ?3,
                ?4
             );",
            params![
                sheet_id.to_string(),
                member.id.to_string(),
                member.name.as_str(),
                member.carry_capacity
            ],
        )?;
    }
    Ok(())
}

/// New carrier references must name an existing member of the sheet.
fn ensure_carrier(conn: &Connection, sheet_id: SheetId, carrier: Option<MemberId>) -> RepoResult<()> {
    match carrier {
        Some(member_id) if !member_exists(conn, sheet_id, member_id)? => {
            Err(RepoError::not_found(EntityKind::Member, member_id))
        }
        _ => Ok(()),
    }
}

fn sheet_exists(conn: &Connection, sheet_id: SheetId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sheets WHERE uuid = ?1);",
        [sheet_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn item_exists(conn: &Connection, sheet_id: SheetId, item_id: ItemId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sheet_items WHERE sheet_uuid = ?1 AND uuid = ?2);",
        params![sheet_id.to_string(), item_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn member_exists(conn: &Connection, sheet_id: SheetId, member_id: MemberId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sheet_members WHERE sheet_uuid = ?1 AND uuid = ?2);",
        params![sheet_id.to_string(), member_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn current_version(conn: &Connection, sheet_id: SheetId) -> RepoResult<u64> {
    let version = conn
        .query_row(
            "SELECT version FROM sheets WHERE uuid = ?1;",
            [sheet_id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .ok_or_else(|| RepoError::not_found(EntityKind::Sheet, sheet_id))?;
    version_from_db(version)
}

fn load_items(conn: &Connection, sheet_id: SheetId) -> RepoResult<Vec<Item>> {
    let mut stmt = conn.prepare(&format!(
        "{ITEM_SELECT_SQL}
         WHERE sheet_uuid = ?1
         ORDER BY sort_order ASC, uuid ASC;"
    ))?;
    let mut rows = stmt.query([sheet_id.to_string()])?;
    let mut items = Vec::new();

    while let Some(row) = rows.next()? {
        items.push(parse_item_row(row)?);
    }

    Ok(items)
}

fn load_members(conn: &Connection, sheet_id: SheetId) -> RepoResult<Vec<Member>> {
    let mut stmt = conn.prepare(
        "SELECT uuid, name, carry_capacity
         FROM sheet_members
         WHERE sheet_uuid = ?1
         ORDER BY sort_order ASC, uuid ASC;",
    )?;
    let mut rows = stmt.query([sheet_id.to_string()])?;
    let mut members = Vec::new();

    while let Some(row) = rows.next()? {
        let uuid_text: String = row.get("uuid")?;
        members.push(Member {
            id: parse_uuid(&uuid_text, "sheet_members.uuid")?,
            name: row.get("name")?,
            carry_capacity: row.get("carry_capacity")?,
        });
    }

    Ok(members)
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<Item> {
    let uuid_text: String = row.get("uuid")?;
    let quantity_raw: i64 = row.get("quantity")?;
    let quantity = u32::try_from(quantity_raw).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid quantity `{quantity_raw}` in sheet_items.quantity"
        ))
    })?;
    let carried_by = match row.get::<_, Option<String>>("carried_by")? {
        Some(text) => Some(parse_uuid(&text, "sheet_items.carried_by")?),
        None => None,
    };

    let item = Item {
        id: parse_uuid(&uuid_text, "sheet_items.uuid")?,
        name: row.get("name")?,
        weight: row.get("weight")?,
        quantity,
        value: row.get("value")?,
        description: row.get("description")?,
        category: row.get("category")?,
        reference: row.get("reference")?,
        carried_by,
    };
    item.validate()
        .map_err(|err| RepoError::InvalidData(format!("item {}: {err}", item.id)))?;
    Ok(item)
}

fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn version_to_db(version: u64) -> RepoResult<i64> {
    i64::try_from(version)
        .map_err(|_| RepoError::InvalidData(format!("version {version} exceeds storage range")))
}

fn version_from_db(version: i64) -> RepoResult<u64> {
    u64::try_from(version)
        .map_err(|_| RepoError::InvalidData(format!("invalid version `{version}` in sheets.version")))
}

fn count_from_db(count: i64) -> RepoResult<u32> {
    u32::try_from(count)
        .map_err(|_| RepoError::InvalidData(format!("invalid row count `{count}`")))
}
