//! Integration test for store setup and migrations.
//!
//! Exercises: open_db, migrate, WAL configuration, table shapes, and the
//! additive upgrade of an existing v1 store.

use std::time::Duration;

use reread_core::{db, schema};

fn temp_db_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("test.db")
}

#[tokio::test]
async fn fresh_store_lifecycle() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = temp_db_path(&dir);
    let conn = db::open_db(&path, Duration::from_secs(5)).await.unwrap();

    let version: i64 = conn
        .call(|db| {
            Ok::<_, rusqlite::Error>(db.query_row(
                "SELECT MAX(version) FROM schema_version",
                [],
                |r| r.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(version, schema::latest_version(), "schema should be fully migrated");
    assert_eq!(version, 3);

    let journal: String = conn
        .call(|db| {
            Ok::<_, rusqlite::Error>(
                db.query_row("PRAGMA journal_mode", [], |r| r.get(0))?,
            )
        })
        .await
        .unwrap();
    assert_eq!(journal, "wal", "journal_mode should be wal");

    // Composite primary keys.
    let pk_count = |table: &'static str| {
        let conn = conn.clone();
        async move {
            conn.call(move |db| {
                Ok::<_, rusqlite::Error>(db.query_row(
                    &format!("SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE pk > 0"),
                    [],
                    |r| r.get::<_, i64>(0),
                )?)
            })
            .await
            .unwrap()
        }
    };
    assert_eq!(pk_count("revisions").await, 2, "revisions keyed by (path, hash)");
    assert_eq!(pk_count("read_pointers").await, 3, "pointers keyed by (session, branch, path)");
    assert_eq!(pk_count("mtime_index").await, 1, "mtime index keyed by path");

    let events: i64 = conn
        .call(|db| {
            Ok::<_, rusqlite::Error>(
                db.query_row("SELECT COUNT(*) FROM read_events", [], |r| r.get(0))?,
            )
        })
        .await
        .unwrap();
    assert_eq!(events, 0, "read_events table should exist and be empty");

    // Reopening is a no-op: no duplicate version rows.
    let conn2 = db::open_db(&path, Duration::from_secs(5)).await.unwrap();
    let rows: i64 = conn2
        .call(|db| {
            Ok::<_, rusqlite::Error>(
                db.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))?,
            )
        })
        .await
        .unwrap();
    assert_eq!(rows, 3, "one version row per applied step");
}

#[tokio::test]
async fn migration_preserves_v1_data() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = temp_db_path(&dir);

    // A store written by a build that only knew v1, plus a table nobody owns.
    {
        let db = rusqlite::Connection::open(&path).unwrap();
        db.execute_batch(schema::SCHEMA_VERSION_DDL).unwrap();
        db.execute_batch(schema::SCHEMA_V1_SQL).unwrap();
        db.execute_batch(
            "INSERT INTO schema_version (version) VALUES (1);
             INSERT INTO revisions (path, hash, content, line_count, created_at)
                 VALUES ('/src/a.rs', 'abc', 'fn main() {}\n', 1, 10);
             INSERT INTO read_pointers (session_id, branch, path, last_hash, last_read_at)
                 VALUES ('s1', 'main', '/src/a.rs', 'abc', 10);
             CREATE TABLE legacy_notes (body TEXT);
             INSERT INTO legacy_notes (body) VALUES ('keep me');",
        )
        .unwrap();
    }

    let conn = db::open_db(&path, Duration::from_secs(5)).await.unwrap();

    let (revisions, pointers, notes, version): (i64, i64, i64, i64) = conn
        .call(|db| {
            Ok::<_, rusqlite::Error>(db.query_row(
                "SELECT (SELECT COUNT(*) FROM revisions),
                        (SELECT COUNT(*) FROM read_pointers),
                        (SELECT COUNT(*) FROM legacy_notes),
                        (SELECT MAX(version) FROM schema_version)",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )?)
        })
        .await
        .unwrap();

    assert_eq!(revisions, 1, "existing revisions survive the upgrade");
    assert_eq!(pointers, 1, "existing pointers survive the upgrade");
    assert_eq!(notes, 1, "unrelated tables are never dropped");
    assert_eq!(version, 3, "v2 and v3 applied on top of v1");

    let last_seen: i64 = conn
        .call(|db| {
            Ok::<_, rusqlite::Error>(db.query_row(
                "SELECT last_seen FROM revisions WHERE path = '/src/a.rs'",
                [],
                |r| r.get(0),
            )?)
        })
        .await
        .unwrap();
    assert!(last_seen > 0, "existing revisions are seeded with a sequence");
}

#[tokio::test]
async fn newer_schema_is_opened_as_is() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = temp_db_path(&dir);
    {
        let mut db = rusqlite::Connection::open(&path).unwrap();
        schema::migrate(&mut db).unwrap();
        db.execute("INSERT INTO schema_version (version) VALUES (99)", [])
            .unwrap();
    }

    let conn = db::open_db(&path, Duration::from_secs(5)).await.unwrap();
    let version: i64 = conn
        .call(|db| Ok::<_, rusqlite::Error>(schema::current_version(db)?))
        .await
        .unwrap();
    assert_eq!(version, 99, "a newer store is left untouched");
}
