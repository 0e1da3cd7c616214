use invsheet_core::db::open_db_in_memory;
use invsheet_core::model::sheet::EntityKind;
use invsheet_core::{
    Action, ErrorKind, IdGenerator, Item, ItemDraft, Member, MemberChanges, MemberRemoval,
    MetadataUpdate, RemovalMode, Sheet, SheetPatch, SheetRepository, SheetService,
    SheetServiceError, SqliteSheetRepository, ValidationError, WriteMode,
};
use rusqlite::Connection;
use std::sync::Arc;
use uuid::Uuid;

struct FixedId(Uuid);

impl IdGenerator for FixedId {
    fn next_id(&self) -> Uuid {
        self.0
    }
}

fn service(conn: &Connection, mode: WriteMode) -> SheetService<SqliteSheetRepository<'_>> {
    SheetService::new(SqliteSheetRepository::try_new(conn).unwrap()).with_write_mode(mode)
}

fn metadata(name: Option<&str>, members: MemberChanges) -> Action {
    Action::SheetMetadataUpdate(MetadataUpdate {
        name: name.map(str::to_string),
        members,
    })
}

/// Sheet with Ayla (Rope, Lantern), Bram (Tent) and an unowned Map.
fn seeded(service: &SheetService<SqliteSheetRepository<'_>>) -> (Sheet, Member, Member) {
    let sheet = service.create_sheet("Party Loot").unwrap();
    let ayla = Member::new("Ayla", 50.0);
    let bram = Member::new("Bram", 80.0);
    service
        .apply_action(
            sheet.id,
            &metadata(
                None,
                MemberChanges {
                    add: vec![ayla.clone(), bram.clone()],
                    ..MemberChanges::default()
                },
            ),
        )
        .unwrap();
    for (name, carrier) in [
        ("Rope", Some(ayla.id)),
        ("Lantern", Some(ayla.id)),
        ("Tent", Some(bram.id)),
        ("Map", None),
    ] {
        let draft = ItemDraft {
            carried_by: carrier,
            ..ItemDraft::named(name)
        };
        service
            .apply_action(sheet.id, &Action::ItemAdd(draft))
            .unwrap();
    }
    (service.get_sheet(sheet.id).unwrap(), ayla, bram)
}

fn remove(member: Uuid, mode: RemovalMode) -> Action {
    metadata(
        None,
        MemberChanges {
            remove: vec![MemberRemoval::new(member, mode)],
            ..MemberChanges::default()
        },
    )
}

#[test]
fn create_sheet_starts_at_version_zero() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);

    let sheet = service.create_sheet("  Party Loot ").unwrap();

    assert_eq!(sheet.name, "Party Loot");
    assert_eq!(sheet.version, 0);
    assert!(sheet.items.is_empty() && sheet.members.is_empty());
}

#[test]
fn create_sheet_rejects_long_names() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);

    let err = service
        .create_sheet("A name that is far too long for a sheet")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(service.list_sheets().unwrap().is_empty());
}

#[test]
fn item_add_appends_and_bumps_version() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let sheet = service.create_sheet("Loot").unwrap();
    let draft = ItemDraft {
        weight: 2.0,
        ..ItemDraft::named("Rope")
    };

    let version = service
        .apply_action(sheet.id, &Action::ItemAdd(draft))
        .unwrap();

    assert_eq!(version, 1);
    let stored = service.get_sheet(sheet.id).unwrap();
    assert_eq!(stored.items.len(), 1);
    assert_eq!(stored.items[0].name, "Rope");
    assert_eq!(stored.items[0].weight, 2.0);
}

#[test]
fn item_add_without_id_uses_injected_generator() {
    let conn = open_db_in_memory().unwrap();
    let item_id = Uuid::new_v4();
    let repo = SqliteSheetRepository::try_new(&conn).unwrap();
    let sheet = Sheet::new(Uuid::new_v4(), "Loot");
    repo.create_sheet(&sheet).unwrap();
    let service = SheetService::new(repo).with_id_generator(Arc::new(FixedId(item_id)));

    service
        .apply_action(sheet.id, &Action::ItemAdd(ItemDraft::named("Rope")))
        .unwrap();

    assert!(service.get_sheet(sheet.id).unwrap().item(item_id).is_some());
}

#[test]
fn item_remove_and_update_target_one_item() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let (sheet, _, bram) = seeded(&service);
    let rope = sheet.items[0].clone();
    let lantern = sheet.items[1].clone();

    service
        .apply_action(sheet.id, &Action::ItemRemove(rope.id))
        .unwrap();
    let updated = Item {
        carried_by: Some(bram.id),
        quantity: 2,
        ..lantern
    };
    let version = service
        .apply_action(sheet.id, &Action::ItemUpdate(updated.clone()))
        .unwrap();

    assert_eq!(version, sheet.version + 2);
    let stored = service.get_sheet(sheet.id).unwrap();
    assert!(stored.item(rope.id).is_none());
    assert_eq!(stored.items[0], updated);
    assert_eq!(stored.items.len(), 3);
}

#[test]
fn metadata_add_members_bumps_version_once() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let sheet = service.create_sheet("Loot").unwrap();
    let cora = Member::new("Cora", 40.0);

    let version = service
        .apply_action(
            sheet.id,
            &metadata(
                None,
                MemberChanges {
                    add: vec![cora.clone()],
                    ..MemberChanges::default()
                },
            ),
        )
        .unwrap();

    assert_eq!(version, sheet.version + 1);
    let stored = service.get_sheet(sheet.id).unwrap();
    assert_eq!(stored.members.iter().filter(|m| m.id == cora.id).count(), 1);
}

#[test]
fn metadata_rename_and_member_update() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let (sheet, ayla, _) = seeded(&service);

    let version = service
        .apply_action(
            sheet.id,
            &metadata(
                Some("Dungeon Haul"),
                MemberChanges {
                    update: vec![Member {
                        id: ayla.id,
                        name: "Ayla the Bold".to_string(),
                        carry_capacity: 65.0,
                    }],
                    ..MemberChanges::default()
                },
            ),
        )
        .unwrap();

    assert_eq!(version, sheet.version + 2);
    let stored = service.get_sheet(sheet.id).unwrap();
    assert_eq!(stored.name, "Dungeon Haul");
    let renamed = stored.member(ayla.id).unwrap();
    assert_eq!(renamed.name, "Ayla the Bold");
    assert_eq!(renamed.carry_capacity, 65.0);
}

#[test]
fn removal_move_to_reassigns_items() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let (sheet, ayla, bram) = seeded(&service);

    service
        .apply_action(
            sheet.id,
            &remove(ayla.id, RemovalMode::MoveTo { target: bram.id }),
        )
        .unwrap();

    let stored = service.get_sheet(sheet.id).unwrap();
    assert!(!stored.has_member(ayla.id));
    assert_eq!(stored.items_carried_by(bram.id).count(), 3);
    assert_eq!(stored.version, sheet.version + 2);
}

#[test]
fn removal_clear_unowns_items() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let (sheet, ayla, _) = seeded(&service);

    service
        .apply_action(sheet.id, &remove(ayla.id, RemovalMode::Clear))
        .unwrap();

    let stored = service.get_sheet(sheet.id).unwrap();
    assert_eq!(stored.items[0].carried_by, None);
    assert_eq!(stored.items[1].carried_by, None);
    assert!(stored.dangling_items().is_empty());
}

#[test]
fn removal_leave_keeps_references() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let (sheet, ayla, _) = seeded(&service);

    let version = service
        .apply_action(sheet.id, &remove(ayla.id, RemovalMode::Leave))
        .unwrap();

    assert_eq!(version, sheet.version + 1);
    let stored = service.get_sheet(sheet.id).unwrap();
    assert_eq!(stored.items[0].carried_by, Some(ayla.id));
    assert_eq!(stored.dangling_items().len(), 2);
}

#[test]
fn removal_delete_items_drops_carried_items() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let (sheet, ayla, _) = seeded(&service);

    service
        .apply_action(sheet.id, &remove(ayla.id, RemovalMode::DeleteItems))
        .unwrap();

    let stored = service.get_sheet(sheet.id).unwrap();
    let names: Vec<&str> = stored.items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["Tent", "Map"]);
}

#[test]
fn move_to_a_member_removed_in_the_same_update_is_invalid() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let (sheet, ayla, bram) = seeded(&service);

    let err = service
        .apply_action(
            sheet.id,
            &metadata(
                None,
                MemberChanges {
                    remove: vec![
                        MemberRemoval::new(ayla.id, RemovalMode::MoveTo { target: bram.id }),
                        MemberRemoval::new(bram.id, RemovalMode::Clear),
                    ],
                    ..MemberChanges::default()
                },
            ),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        SheetServiceError::Validation(ValidationError::MoveTargetRemoved { .. })
    ));
    assert_eq!(service.get_sheet(sheet.id).unwrap().version, sheet.version);
}

#[test]
fn not_found_cases() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let (sheet, _, _) = seeded(&service);

    let missing_sheet = service
        .apply_action(Uuid::new_v4(), &Action::ItemAdd(ItemDraft::named("Rope")))
        .unwrap_err();
    assert!(matches!(
        missing_sheet,
        SheetServiceError::NotFound {
            entity: EntityKind::Sheet,
            ..
        }
    ));

    let missing_item = service
        .apply_action(sheet.id, &Action::ItemRemove(Uuid::new_v4()))
        .unwrap_err();
    assert_eq!(missing_item.kind(), ErrorKind::NotFound);

    let stranger = Uuid::new_v4();
    let orphan = ItemDraft {
        carried_by: Some(stranger),
        ..ItemDraft::named("Rope")
    };
    let missing_carrier = service
        .apply_action(sheet.id, &Action::ItemAdd(orphan))
        .unwrap_err();
    assert!(matches!(
        missing_carrier,
        SheetServiceError::NotFound { entity: EntityKind::Member, id } if id == stranger
    ));

    assert!(matches!(
        service.get_sheet(Uuid::new_v4()),
        Err(SheetServiceError::NotFound { .. })
    ));
}

#[test]
fn client_only_actions_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let sheet = service.create_sheet("Loot").unwrap();

    for action in [
        Action::SheetUpdate(SheetPatch::default()),
        Action::SheetSetIsAhead(true),
    ] {
        let err = service.apply_action(sheet.id, &action).unwrap_err();
        assert!(matches!(
            err,
            SheetServiceError::Validation(ValidationError::ClientOnlyAction(_))
        ));
    }
}

#[test]
fn atomic_mode_rolls_back_composite_update() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let (sheet, _, _) = seeded(&service);
    let cora = Member::new("Cora", 40.0);
    let ghost = Member::new("Ghost", 10.0);

    let err = service
        .apply_action(
            sheet.id,
            &metadata(
                Some("Renamed"),
                MemberChanges {
                    add: vec![cora],
                    update: vec![ghost],
                    ..MemberChanges::default()
                },
            ),
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    let stored = service.get_sheet(sheet.id).unwrap();
    assert_eq!(stored, sheet);
}

#[test]
fn per_operation_mode_reports_partial_application() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::PerOperation);
    let (sheet, _, _) = seeded(&service);
    let cora = Member::new("Cora", 40.0);
    let ghost = Member::new("Ghost", 10.0);

    let err = service
        .apply_action(
            sheet.id,
            &metadata(
                Some("Renamed"),
                MemberChanges {
                    add: vec![cora.clone()],
                    update: vec![ghost],
                    ..MemberChanges::default()
                },
            ),
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialApplication);
    let SheetServiceError::PartialApplication {
        applied,
        total,
        failures,
    } = err
    else {
        panic!("expected partial application");
    };
    assert_eq!((applied, total), (2, 3));
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 2);
    assert_eq!(failures[0].op, "set_member_fields");
    assert_eq!(failures[0].kind, ErrorKind::NotFound);

    let stored = service.get_sheet(sheet.id).unwrap();
    assert_eq!(stored.name, "Renamed");
    assert!(stored.has_member(cora.id));
    assert_eq!(stored.version, sheet.version + 2);
}

#[test]
fn per_operation_mode_reports_total_failure_directly() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::PerOperation);
    let sheet = service.create_sheet("Loot").unwrap();

    let err = service
        .apply_action(sheet.id, &Action::ItemRemove(Uuid::new_v4()))
        .unwrap_err();

    assert!(matches!(
        err,
        SheetServiceError::NotFound {
            entity: EntityKind::Item,
            ..
        }
    ));
}

#[test]
fn empty_metadata_update_is_a_no_op() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let sheet = service.create_sheet("Loot").unwrap();

    let version = service
        .apply_action(sheet.id, &metadata(None, MemberChanges::default()))
        .unwrap();

    assert_eq!(version, 0);
}

#[test]
fn apply_and_fetch_returns_canonical_document() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn, WriteMode::Atomic);
    let sheet = service.create_sheet("Loot").unwrap();

    let refreshed = service
        .apply_and_fetch(sheet.id, &Action::ItemAdd(ItemDraft::named("Rope")))
        .unwrap();

    assert_eq!(refreshed.items.len(), 1);
    assert_eq!(refreshed.version, sheet.version + 1);
    assert_eq!(refreshed, service.get_sheet(sheet.id).unwrap());
}
