//! Table access for revisions, read pointers, the mtime index and the read
//! log.
//!
//! Every function takes a plain `&rusqlite::Connection` so it can run inside
//! whatever transaction the caller holds (a `Transaction` derefs to one).
//! Rows are decoded into the typed records of `crate::types` right here and
//! nowhere else.

use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::source::{content_hash, FileSource};
use crate::types::{
    CacheStats, MtimeEntry, ReadEvent, ReadKind, ReadPointer, Revision, RevisionSummary,
};

fn revision_from_row(r: &Row<'_>) -> rusqlite::Result<Revision> {
    Ok(Revision {
        path: r.get(0)?,
        hash: r.get(1)?,
        content: r.get(2)?,
        line_count: r.get::<_, i64>(3)? as usize,
        created_at: r.get(4)?,
    })
}

fn summary_from_row(r: &Row<'_>) -> rusqlite::Result<RevisionSummary> {
    Ok(RevisionSummary {
        path: r.get(0)?,
        hash: r.get(1)?,
        line_count: r.get::<_, i64>(2)? as usize,
        created_at: r.get(3)?,
    })
}

fn pointer_from_row(r: &Row<'_>) -> rusqlite::Result<ReadPointer> {
    Ok(ReadPointer {
        session_id: r.get(0)?,
        branch: r.get(1)?,
        path: r.get(2)?,
        last_hash: r.get(3)?,
        last_read_at: r.get(4)?,
    })
}

/// Stores a revision unless `(path, hash)` is already present.
///
/// Returns `true` when a new row was written. A duplicate is not an error.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the insert fails.
pub fn put_revision_if_absent(
    db: &rusqlite::Connection,
    path: &str,
    hash: &str,
    content: &str,
    line_count: usize,
    now: i64,
) -> rusqlite::Result<bool> {
    let inserted = db.execute(
        "INSERT INTO revisions (path, hash, content, line_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(path, hash) DO NOTHING",
        params![path, hash, content, line_count as i64, now],
    )?;
    Ok(inserted > 0)
}

/// Marks `(path, hash)` as the most recently observed revision of `path`.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the update fails.
pub fn mark_seen(db: &rusqlite::Connection, path: &str, hash: &str) -> rusqlite::Result<()> {
    db.execute(
        "UPDATE revisions
         SET last_seen = (SELECT COALESCE(MAX(last_seen), 0) + 1 FROM revisions WHERE path = ?1)
         WHERE path = ?1 AND hash = ?2",
        params![path, hash],
    )?;
    Ok(())
}

/// Fetches one revision, or `None` if it was never stored or has been pruned.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the query fails.
pub fn get_revision(
    db: &rusqlite::Connection,
    path: &str,
    hash: &str,
) -> rusqlite::Result<Option<Revision>> {
    db.query_row(
        "SELECT path, hash, content, line_count, created_at
         FROM revisions WHERE path = ?1 AND hash = ?2",
        params![path, hash],
        revision_from_row,
    )
    .optional()
}

/// Returns the revision `steps_back` versions before the most recently
/// observed one for `path` (`0` is the current content), together with how
/// many revisions exist.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the query fails.
pub fn revision_steps_back(
    db: &rusqlite::Connection,
    path: &str,
    steps_back: usize,
) -> rusqlite::Result<(Option<Revision>, usize)> {
    let available: i64 = db.query_row(
        "SELECT COUNT(*) FROM revisions WHERE path = ?1",
        params![path],
        |r| r.get(0),
    )?;
    let revision = db
        .query_row(
            "SELECT path, hash, content, line_count, created_at
             FROM revisions WHERE path = ?1
             ORDER BY last_seen DESC, rowid DESC
             LIMIT 1 OFFSET ?2",
            params![path, steps_back as i64],
            revision_from_row,
        )
        .optional()?;
    Ok((revision, available as usize))
}

/// Lists up to `limit` revisions of `path`, most recently observed first.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the query fails.
pub fn list_revisions(
    db: &rusqlite::Connection,
    path: &str,
    limit: usize,
) -> rusqlite::Result<Vec<RevisionSummary>> {
    let mut stmt = db.prepare(
        "SELECT path, hash, line_count, created_at
         FROM revisions WHERE path = ?1
         ORDER BY last_seen DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![path, limit as i64], summary_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Deletes all but the newest `keep_per_path` revisions of every path (or
/// only of `only_path` when given). Returns the number of rows removed.
///
/// Revisions rank by when they were last observed. The revision a path's
/// mtime entry currently points at is always kept.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the delete fails.
pub fn prune_revisions(
    db: &rusqlite::Connection,
    keep_per_path: usize,
    only_path: Option<&str>,
) -> rusqlite::Result<usize> {
    db.execute(
        "DELETE FROM revisions
         WHERE (?2 IS NULL OR path = ?2)
           AND rowid IN (
               SELECT rowid FROM (
                   SELECT rowid, path, hash,
                          ROW_NUMBER() OVER (
                              PARTITION BY path
                              ORDER BY last_seen DESC, rowid DESC
                          ) AS rn
                   FROM revisions
                   WHERE (?2 IS NULL OR path = ?2)
               ) ranked
               WHERE ranked.rn > ?1
                 AND NOT EXISTS (
                     SELECT 1 FROM mtime_index m
                     WHERE m.path = ranked.path AND m.hash = ranked.hash
                 )
           )",
        params![keep_per_path as i64, only_path],
    )
}

/// # Errors
///
/// Returns `rusqlite::Error` if the query fails.
pub fn get_mtime_entry(
    db: &rusqlite::Connection,
    path: &str,
) -> rusqlite::Result<Option<MtimeEntry>> {
    db.query_row(
        "SELECT path, hash, mtime_ms FROM mtime_index WHERE path = ?1",
        params![path],
        |r| {
            Ok(MtimeEntry {
                path: r.get(0)?,
                hash: r.get(1)?,
                mtime_ms: r.get(2)?,
            })
        },
    )
    .optional()
}

/// # Errors
///
/// Returns `rusqlite::Error` if the upsert fails.
pub fn set_mtime_entry(db: &rusqlite::Connection, entry: &MtimeEntry) -> rusqlite::Result<()> {
    db.execute(
        "INSERT INTO mtime_index (path, hash, mtime_ms) VALUES (?1, ?2, ?3)
         ON CONFLICT(path) DO UPDATE SET hash = excluded.hash, mtime_ms = excluded.mtime_ms",
        params![&entry.path, &entry.hash, entry.mtime_ms],
    )?;
    Ok(())
}

/// Current content of a file as resolved through the mtime index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub hash: String,
    pub content: String,
    pub line_count: usize,
    /// `true` when the file was read and hashed, `false` on a fast-path hit.
    pub fresh: bool,
}

/// Resolves the current `(hash, content)` of `path`.
///
/// If the stored mtime equals the file's mtime and the referenced revision is
/// still stored, that revision is returned without touching the file.
/// Otherwise the file is read and hashed, its revision stored and the mtime
/// entry overwritten.
///
/// # Errors
///
/// Returns `CacheError::NotFound` if the file cannot be stat'ed or read (in
/// which case nothing was written), or `CacheError::Sqlite` on store failure.
pub fn resolve_current(
    db: &rusqlite::Connection,
    source: &dyn FileSource,
    path: &str,
    now: i64,
) -> Result<Resolved> {
    let not_found = |source: std::io::Error| CacheError::NotFound {
        path: path.to_owned(),
        source,
    };
    let disk_mtime = source.mtime_ms(path).map_err(not_found)?;

    if let Some(entry) = get_mtime_entry(db, path)? {
        if entry.mtime_ms == disk_mtime {
            if let Some(rev) = get_revision(db, path, &entry.hash)? {
                debug!(path, "mtime index hit");
                return Ok(Resolved {
                    hash: rev.hash,
                    content: rev.content,
                    line_count: rev.line_count,
                    fresh: false,
                });
            }
        }
    }

    let bytes = source.read(path).map_err(not_found)?;
    let hash = content_hash(&bytes);
    let content = String::from_utf8_lossy(&bytes).into_owned();
    let line_count = content.lines().count();

    put_revision_if_absent(db, path, &hash, &content, line_count, now)?;
    mark_seen(db, path, &hash)?;
    set_mtime_entry(
        db,
        &MtimeEntry {
            path: path.to_owned(),
            hash: hash.clone(),
            mtime_ms: disk_mtime,
        },
    )?;

    Ok(Resolved {
        hash,
        content,
        line_count,
        fresh: true,
    })
}

/// Returns the last hash `session_id` observed for `path` on `branch`.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the query fails.
pub fn get_pointer(
    db: &rusqlite::Connection,
    session_id: &str,
    branch: &str,
    path: &str,
) -> rusqlite::Result<Option<String>> {
    db.query_row(
        "SELECT last_hash FROM read_pointers
         WHERE session_id = ?1 AND branch = ?2 AND path = ?3",
        params![session_id, branch, path],
        |r| r.get(0),
    )
    .optional()
}

/// Upserts the pointer for `(session_id, branch, path)`.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the upsert fails.
pub fn set_pointer(
    db: &rusqlite::Connection,
    session_id: &str,
    branch: &str,
    path: &str,
    hash: &str,
    now: i64,
) -> rusqlite::Result<()> {
    db.execute(
        "INSERT INTO read_pointers (session_id, branch, path, last_hash, last_read_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(session_id, branch, path)
         DO UPDATE SET last_hash = excluded.last_hash,
                       last_read_at = excluded.last_read_at",
        params![session_id, branch, path, hash, now],
    )?;
    Ok(())
}

/// Lists every pointer of one session on one branch, most recently read first.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the query fails.
pub fn list_pointers(
    db: &rusqlite::Connection,
    session_id: &str,
    branch: &str,
) -> rusqlite::Result<Vec<ReadPointer>> {
    let mut stmt = db.prepare(
        "SELECT session_id, branch, path, last_hash, last_read_at
         FROM read_pointers
         WHERE session_id = ?1 AND branch = ?2
         ORDER BY last_read_at DESC, path ASC",
    )?;
    let rows = stmt
        .query_map(params![session_id, branch], pointer_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// # Errors
///
/// Returns `rusqlite::Error` if the insert fails.
pub fn record_event(db: &rusqlite::Connection, event: &ReadEvent) -> rusqlite::Result<()> {
    db.execute(
        "INSERT INTO read_events
             (session_id, branch, path, outcome, lines_changed, tokens_saved, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &event.session_id,
            &event.branch,
            &event.path,
            event.kind.as_str(),
            event.lines_changed as i64,
            event.tokens_saved as i64,
            event.created_at,
        ],
    )?;
    Ok(())
}

/// Lists up to `limit` read events for `path`, newest first.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the query fails.
pub fn list_events(
    db: &rusqlite::Connection,
    path: &str,
    limit: usize,
) -> rusqlite::Result<Vec<ReadEvent>> {
    let mut stmt = db.prepare(
        "SELECT session_id, branch, path, outcome, lines_changed, tokens_saved, created_at
         FROM read_events WHERE path = ?1
         ORDER BY id DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![path, limit as i64], |r| {
            let outcome: String = r.get(3)?;
            let kind = ReadKind::from_str(&outcome).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("unknown read outcome {outcome:?}").into(),
                )
            })?;
            Ok(ReadEvent {
                session_id: r.get(0)?,
                branch: r.get(1)?,
                path: r.get(2)?,
                kind,
                lines_changed: r.get::<_, i64>(4)? as usize,
                tokens_saved: r.get::<_, i64>(5)? as usize,
                created_at: r.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Aggregates store-wide counters; read counters and pointers are limited to
/// `session_id` when given.
///
/// # Errors
///
/// Returns `rusqlite::Error` if any query fails.
pub fn stats(db: &rusqlite::Connection, session_id: Option<&str>) -> rusqlite::Result<CacheStats> {
    let (revisions, tracked_paths): (i64, i64) = db.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT path) FROM revisions",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let pointers: i64 = db.query_row(
        "SELECT COUNT(*) FROM read_pointers WHERE ?1 IS NULL OR session_id = ?1",
        params![session_id],
        |r| r.get(0),
    )?;
    let (reads, cached_reads, tokens_saved): (i64, i64, i64) = db.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(outcome IN ('unchanged', 'unchanged_in_range', 'diff')), 0),
                COALESCE(SUM(tokens_saved), 0)
         FROM read_events WHERE ?1 IS NULL OR session_id = ?1",
        params![session_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;

    Ok(CacheStats {
        revisions: revisions as usize,
        tracked_paths: tracked_paths as usize,
        pointers: pointers as usize,
        reads: reads as usize,
        cached_reads: cached_reads as usize,
        tokens_saved: tokens_saved as usize,
    })
}
