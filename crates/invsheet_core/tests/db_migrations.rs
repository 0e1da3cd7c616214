use invsheet_core::db::migrations::latest_version;
use invsheet_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "sheets");
    assert_table_exists(&conn, "sheet_members");
    assert_table_exists(&conn, "sheet_items");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invsheet.sqlite3");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "sheet_items");
}

#[test]
fn deleting_a_sheet_cascades_to_rows() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO sheets (uuid, name) VALUES ('s1', 'Loot');
         INSERT INTO sheet_members (sheet_uuid, uuid, sort_order, name) VALUES ('s1', 'm1', 0, 'Ayla');
         INSERT INTO sheet_items (sheet_uuid, uuid, sort_order, name, carried_by)
             VALUES ('s1', 'i1', 0, 'Rope', 'm1');
         DELETE FROM sheets WHERE uuid = 's1';",
    )
    .unwrap();

    assert_eq!(row_count(&conn, "sheet_members"), 0);
    assert_eq!(row_count(&conn, "sheet_items"), 0);
}

#[test]
fn negative_amounts_are_rejected_by_schema() {
    let conn = open_db_in_memory().unwrap();
    conn.execute("INSERT INTO sheets (uuid, name) VALUES ('s1', 'Loot');", [])
        .unwrap();

    let result = conn.execute(
        "INSERT INTO sheet_items (sheet_uuid, uuid, sort_order, name, weight)
         VALUES ('s1', 'i1', 0, 'Anvil', -1);",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn row_count(conn: &Connection, table_name: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table_name};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
