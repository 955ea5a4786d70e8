/// One immutable stored copy of a file's content.
///
/// Keyed by `(path, hash)`. Writing the same bytes under the same path twice
/// never produces a second row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub path: String,
    pub hash: String,         // hex SHA-256 of `content`
    pub content: String,
    pub line_count: usize,
    pub created_at: i64,      // Unix timestamp millis
}

/// Revision metadata without its content, for the `history` projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSummary {
    pub path: String,
    pub hash: String,
    pub line_count: usize,
    pub created_at: i64,
}

/// The last hash one session observed for one path on one branch.
///
/// Never shared across sessions: each session's cache outcome depends only on
/// its own pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPointer {
    pub session_id: String,
    pub branch: String,
    pub path: String,
    pub last_hash: String,
    pub last_read_at: i64,    // Unix timestamp millis
}

/// Fast-path hint mapping a file's last observed mtime to its hash.
///
/// Purely a performance hint; the hash stays the source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtimeEntry {
    pub path: String,
    pub hash: String,
    pub mtime_ms: i64,
}

/// Per-call context: who is reading and on which branch.
///
/// Replaces any process-wide state; every core call receives one explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadContext {
    pub session_id: String,
    pub branch: String,
}

impl ReadContext {
    pub fn new(session_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            branch: branch.into(),
        }
    }
}

/// Optional line window for a read. Absent or both zero means a full read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl ReadOptions {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn range(offset: usize, limit: usize) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
        }
    }
}

/// Answer to one `read_file` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// `true` when the caller already holds the bytes it needs (confirmation
    /// or diff); `false` when `content` carries raw file text.
    pub cached: bool,
    pub content: String,
    pub diff: Option<String>,
    pub lines_changed: Option<usize>,
    pub total_lines: usize,
    pub hash: String,
}

/// How a read was answered. Persisted in `read_events` as its `as_str` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    /// No usable prior pointer; full or sliced content returned.
    First,
    /// Pointer matched the current hash.
    Unchanged,
    /// Range read whose window missed every changed line.
    UnchangedInRange,
    /// Full read answered with a unified diff.
    Diff,
    /// Range read overlapping a change; the slice was returned verbatim.
    RangeChanged,
    /// Content too large to diff; full content returned.
    Oversized,
}

impl ReadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadKind::First => "first",
            ReadKind::Unchanged => "unchanged",
            ReadKind::UnchangedInRange => "unchanged_in_range",
            ReadKind::Diff => "diff",
            ReadKind::RangeChanged => "range_changed",
            ReadKind::Oversized => "oversized",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "first" => Some(ReadKind::First),
            "unchanged" => Some(ReadKind::Unchanged),
            "unchanged_in_range" => Some(ReadKind::UnchangedInRange),
            "diff" => Some(ReadKind::Diff),
            "range_changed" => Some(ReadKind::RangeChanged),
            "oversized" => Some(ReadKind::Oversized),
            _ => None,
        }
    }
}

/// One row of `read_events`, recorded for every successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEvent {
    pub session_id: String,
    pub branch: String,
    pub path: String,
    pub kind: ReadKind,
    pub lines_changed: usize,
    pub tokens_saved: usize,
    pub created_at: i64,
}

/// Result of `revert_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertOutcome {
    pub path: String,
    pub hash: String,
    pub content: String,
    pub steps_back: usize,
}

/// Aggregate counters for the `stats` projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub revisions: usize,
    pub tracked_paths: usize,
    pub pointers: usize,
    pub reads: usize,
    pub cached_reads: usize,
    pub tokens_saved: usize,
}
