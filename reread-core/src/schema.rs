use tracing::{info, warn};

/// DDL to create the schema_version tracking table.
///
/// Applied unconditionally on every DB open (before checking the version),
/// using `IF NOT EXISTS` so it is safe to run multiple times.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// DDL for the v1 schema: the three core tables.
///
/// - `revisions`: content-addressed file contents, keyed by `(path, hash)`.
/// - `read_pointers`: last hash seen per `(session_id, branch, path)`.
/// - `mtime_index`: one mtime -> hash hint per path.
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS revisions (
        path        TEXT    NOT NULL,
        hash        TEXT    NOT NULL,
        content     TEXT    NOT NULL,
        line_count  INTEGER NOT NULL,
        created_at  INTEGER NOT NULL,
        PRIMARY KEY (path, hash)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS read_pointers (
        session_id   TEXT    NOT NULL,
        branch       TEXT    NOT NULL,
        path         TEXT    NOT NULL,
        last_hash    TEXT    NOT NULL,
        last_read_at INTEGER NOT NULL,
        PRIMARY KEY (session_id, branch, path)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS mtime_index (
        path     TEXT    PRIMARY KEY,
        hash     TEXT    NOT NULL,
        mtime_ms INTEGER NOT NULL
    ) STRICT;
";

/// DDL for v2: the read log behind `history`/`stats`, and an index so
/// retention and history queries don't scan every revision.
pub const SCHEMA_V2_SQL: &str = "
    CREATE TABLE IF NOT EXISTS read_events (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id    TEXT    NOT NULL,
        branch        TEXT    NOT NULL,
        path          TEXT    NOT NULL,
        outcome       TEXT    NOT NULL
                              CHECK(outcome IN ('first', 'unchanged', 'unchanged_in_range',
                                                'diff', 'range_changed', 'oversized')),
        lines_changed INTEGER NOT NULL DEFAULT 0,
        tokens_saved  INTEGER NOT NULL DEFAULT 0,
        created_at    INTEGER NOT NULL
    ) STRICT;

    CREATE INDEX IF NOT EXISTS idx_read_events_session ON read_events(session_id);
    CREATE INDEX IF NOT EXISTS idx_revisions_path_created ON revisions(path, created_at);
";

/// DDL for v3: a per-path sequence bumped whenever a revision is observed as
/// the file's current content, so content that comes back ranks as newest.
/// Existing rows are seeded from insertion order.
pub const SCHEMA_V3_SQL: &str = "
    ALTER TABLE revisions ADD COLUMN last_seen INTEGER NOT NULL DEFAULT 0;
    UPDATE revisions SET last_seen = rowid;
    CREATE INDEX IF NOT EXISTS idx_revisions_path_seen ON revisions(path, last_seen);
";

/// Ordered, additive migration steps. Never drop or rewrite existing tables
/// here: revisions and pointers must survive every upgrade.
pub const MIGRATIONS: &[(i64, &str)] = &[
    (1, SCHEMA_V1_SQL),
    (2, SCHEMA_V2_SQL),
    (3, SCHEMA_V3_SQL),
];

/// Newest schema version this build knows about.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0)
}

/// Reads the recorded schema version (`0` for a fresh database).
///
/// # Errors
///
/// Returns `rusqlite::Error` if the `schema_version` table cannot be queried.
pub fn current_version(db: &rusqlite::Connection) -> rusqlite::Result<i64> {
    db.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )
}

/// Runs forward-only schema migration to migrate the DB to the latest version.
///
/// This function is idempotent: safe to call on every startup regardless of
/// whether the schema has already been applied.
///
/// # Process
///
/// 1. Creates the `schema_version` table if it does not exist.
/// 2. Reads the current version (`0` if the table is empty).
/// 3. Applies every step newer than that version, in order, inside a single
///    `BEGIN IMMEDIATE` transaction, recording each version as it goes.
///
/// A database stamped with a version newer than this build is left alone;
/// all steps are additive, so the tables this build knows are still there.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the DDL fails or the version row cannot be read.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let version = current_version(&tx)?;

    if version > latest_version() {
        warn!(
            found = version,
            known = latest_version(),
            "database schema is newer than this build; continuing without migration"
        );
        return Ok(());
    }

    let mut applied = 0;
    for (step, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > version) {
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [step])?;
        applied += 1;
    }
    tx.commit()?;

    if applied > 0 {
        info!(from = version, to = latest_version(), "schema migrated");
    }
    Ok(())
}
