//! Decides how one read is answered: raw content, an "unchanged"
//! confirmation, or a diff against what the session saw last.
//!
//! Runs entirely against the connection it is handed; the caller owns the
//! surrounding transaction and retry loop, so a request either commits all
//! of its writes (revision, mtime entry, pointer, read event) or none.

use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::diff::{unified_diff, DiffOptions};
use crate::error::Result;
use crate::source::FileSource;
use crate::store::{self, Resolved};
use crate::types::{ReadContext, ReadEvent, ReadKind, ReadOptions, ReadOutcome};

/// Rough token estimate for `text`: one token per four bytes, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// The part of a file a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Full,
    /// Inclusive, 1-based. `end < start` when `start` lies past the last line.
    Range { start: usize, end: usize },
}

impl Window {
    /// Maps `offset`/`limit` onto a window over a file of `total` lines.
    ///
    /// Absent or both-zero options mean a full read. An omitted limit runs
    /// the range to the last line.
    pub fn from_options(opts: ReadOptions, total: usize) -> Self {
        let offset = opts.offset.unwrap_or(0);
        let limit = opts.limit.unwrap_or(0);
        if offset == 0 && limit == 0 {
            return Window::Full;
        }
        let start = offset.max(1);
        let end = if limit == 0 {
            total
        } else {
            start.saturating_add(limit - 1).min(total)
        };
        Window::Range { start, end }
    }

    /// Returns the requested lines of `content` verbatim, terminators included.
    pub fn slice<'a>(&self, content: &'a str) -> std::borrow::Cow<'a, str> {
        match *self {
            Window::Full => content.into(),
            Window::Range { start, end } if end >= start => content
                .split_inclusive('\n')
                .skip(start - 1)
                .take(end + 1 - start)
                .collect::<String>()
                .into(),
            Window::Range { .. } => "".into(),
        }
    }

    fn overlaps(&self, lines: &std::collections::BTreeSet<usize>) -> bool {
        match *self {
            Window::Full => !lines.is_empty(),
            Window::Range { start, end } => end >= start && lines.range(start..=end).next().is_some(),
        }
    }

    fn describe(&self, path: &str, total: usize) -> String {
        match *self {
            Window::Full => format!("{path} ({total} lines)"),
            Window::Range { start, end } if end >= start => {
                format!("{path} lines {start}-{end} of {total}")
            }
            Window::Range { start, .. } => format!("{path} lines {start}- (past end, {total} lines)"),
        }
    }
}

/// Answers reads against one store connection.
pub struct Reconciler<'a> {
    pub source: &'a dyn FileSource,
    pub config: &'a CacheConfig,
}

impl Reconciler<'_> {
    /// Handles one `read_file` request inside the caller's transaction.
    ///
    /// # Process
    ///
    /// 1. Resolve the current content through the mtime index.
    /// 2. Load the session's pointer for `(session, branch, path)`.
    /// 3. No pointer (or its revision was pruned): return content, `cached=false`.
    /// 4. Same hash: return a confirmation, `cached=true`.
    /// 5. Different hash: diff against the old revision. A full read gets the
    ///    diff; a range read gets a confirmation if no change touches the
    ///    window, or the window's current text if one does.
    ///
    /// Every path through here advances the pointer to the current hash and
    /// records one read event.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotFound` if the file cannot be read (nothing is
    /// written), or a store error.
    pub fn read(
        &self,
        db: &rusqlite::Connection,
        ctx: &ReadContext,
        path: &str,
        opts: ReadOptions,
        now: i64,
    ) -> Result<ReadOutcome> {
        let current = store::resolve_current(db, self.source, path, now)?;
        let window = Window::from_options(opts, current.line_count);
        let last_hash = store::get_pointer(db, &ctx.session_id, &ctx.branch, path)?;

        let (outcome, kind, tokens_saved) = match last_hash {
            None => {
                debug!(path, session = %ctx.session_id, "first read");
                self.first_read(&current, window)
            }
            Some(last) if last == current.hash => {
                debug!(path, session = %ctx.session_id, "unchanged");
                let saved = estimate_tokens(&window.slice(&current.content));
                let content = format!(
                    "[unchanged] {} unchanged since last read (~{saved} tokens saved)",
                    window.describe(path, current.line_count)
                );
                (self.confirmation(&current, content), ReadKind::Unchanged, saved)
            }
            Some(last) => self.changed(db, path, &last, &current, window)?,
        };

        store::set_pointer(db, &ctx.session_id, &ctx.branch, path, &current.hash, now)?;
        store::record_event(
            db,
            &ReadEvent {
                session_id: ctx.session_id.clone(),
                branch: ctx.branch.clone(),
                path: path.to_owned(),
                kind,
                lines_changed: outcome.lines_changed.unwrap_or(0),
                tokens_saved,
                created_at: now,
            },
        )?;

        if current.fresh && self.config.keep_revisions > 0 {
            let removed = store::prune_revisions(db, self.config.keep_revisions, Some(path))?;
            if removed > 0 {
                debug!(path, removed, "retention pruned revisions");
            }
        }

        Ok(outcome)
    }

    fn first_read(&self, current: &Resolved, window: Window) -> (ReadOutcome, ReadKind, usize) {
        (self.raw(current, window), ReadKind::First, 0)
    }

    fn raw(&self, current: &Resolved, window: Window) -> ReadOutcome {
        ReadOutcome {
            cached: false,
            content: window.slice(&current.content).into_owned(),
            diff: None,
            lines_changed: None,
            total_lines: current.line_count,
            hash: current.hash.clone(),
        }
    }

    fn confirmation(&self, current: &Resolved, content: String) -> ReadOutcome {
        ReadOutcome {
            cached: true,
            content,
            diff: None,
            lines_changed: Some(0),
            total_lines: current.line_count,
            hash: current.hash.clone(),
        }
    }

    /// The session last saw `last_hash`, the file is now `current`.
    fn changed(
        &self,
        db: &rusqlite::Connection,
        path: &str,
        last_hash: &str,
        current: &Resolved,
        window: Window,
    ) -> Result<(ReadOutcome, ReadKind, usize)> {
        let Some(old) = store::get_revision(db, path, last_hash)? else {
            warn!(path, last_hash, "previous revision no longer stored, serving full read");
            return Ok(self.first_read(current, window));
        };

        let max_bytes = self.config.diff_max_input_bytes;
        if old.content.len() > max_bytes || current.content.len() > max_bytes {
            warn!(path, max_bytes, "content too large to diff, serving full read");
            return Ok((self.raw(current, window), ReadKind::Oversized, 0));
        }

        let diff = unified_diff(
            &old.content,
            &current.content,
            &format!("a/{path}"),
            &format!("b/{path}"),
            &DiffOptions {
                timeout: self.config.diff_timeout(),
                ..DiffOptions::default()
            },
        );

        if !diff.has_changes {
            // Distinct hashes over identical text; only reachable through
            // lossy decoding of non-UTF-8 bytes.
            return Ok(self.first_read(current, window));
        }

        match window {
            Window::Full => {
                let shown = diff.truncated(self.config.diff_output_max_lines);
                let saved = estimate_tokens(&current.content).saturating_sub(estimate_tokens(&shown));
                debug!(path, lines_changed = diff.lines_changed, "serving diff");
                let content = format!(
                    "[changed] {path}: {} lines changed since last read\n{shown}",
                    diff.lines_changed
                );
                let outcome = ReadOutcome {
                    cached: true,
                    content,
                    diff: Some(shown),
                    lines_changed: Some(diff.lines_changed),
                    total_lines: current.line_count,
                    hash: current.hash.clone(),
                };
                Ok((outcome, ReadKind::Diff, saved))
            }
            Window::Range { .. } if !window.overlaps(&diff.changed_new_lines) => {
                let saved = estimate_tokens(&window.slice(&current.content));
                let content = format!(
                    "[unchanged] {} unchanged since last read; changes exist outside this range (~{saved} tokens saved)",
                    window.describe(path, current.line_count)
                );
                Ok((
                    self.confirmation(current, content),
                    ReadKind::UnchangedInRange,
                    saved,
                ))
            }
            Window::Range { .. } => {
                debug!(path, "change inside requested range, serving slice");
                Ok((self.raw(current, window), ReadKind::RangeChanged, 0))
            }
        }
    }
}
