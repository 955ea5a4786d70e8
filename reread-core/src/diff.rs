//! Line diff engine.
//!
//! The edit script comes from `similar`'s Myers implementation, which works
//! in linear space (divide and conquer on the middle snake), so two
//! 20,000-line inputs never allocate an `M x N` table. Everything on top of
//! the edit script is done here: the changed-line set used by range
//! reconciliation, hunk grouping and unified rendering.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Duration;

use similar::{Algorithm, ChangeTag, TextDiff};

/// Context lines kept around each change.
pub const DEFAULT_CONTEXT: usize = 3;

/// Marker emitted after a final line that has no terminator.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// The type of change for a diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Kept,
    Added,
    Removed,
}

impl LineKind {
    fn prefix(self) -> char {
        match self {
            LineKind::Kept => ' ',
            LineKind::Added => '+',
            LineKind::Removed => '-',
        }
    }
}

/// One element of the edit script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    /// Line text without its `\n` terminator.
    pub line: String,
    /// 1-based line number in the old text (`None` for additions).
    pub old_line_no: Option<usize>,
    /// 1-based line number in the new text (`None` for removals).
    pub new_line_no: Option<usize>,
    /// `true` for a final line that had no `\n`.
    pub missing_newline: bool,
}

/// Edit script between two texts plus the new-file lines it touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditScript {
    pub entries: Vec<DiffLine>,
    /// New-file line numbers hit by an addition, or sitting where a removal
    /// happened (removing lines shifts the surrounding context).
    pub changed_new_lines: BTreeSet<usize>,
}

impl EditScript {
    /// Added plus removed entries.
    pub fn lines_changed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.kind != LineKind::Kept)
            .count()
    }

    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.kind != LineKind::Kept)
    }
}

/// Knobs for `unified_diff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    pub context: usize,
    /// Upper bound on time spent searching for a minimal script. Past it the
    /// script is still correct, just not minimal.
    pub timeout: Duration,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context: DEFAULT_CONTEXT,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Rendered diff between two revisions. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Unified diff text; empty when there are no changes.
    pub text: String,
    pub lines_changed: usize,
    pub has_changes: bool,
    pub changed_new_lines: BTreeSet<usize>,
}

impl DiffResult {
    /// Returns `text` cut to at most `max_lines` lines, followed by a note
    /// carrying the real totals when anything was dropped.
    pub fn truncated(&self, max_lines: usize) -> String {
        let total = self.text.lines().count();
        if total <= max_lines {
            return self.text.clone();
        }
        let mut out: String = self
            .text
            .split_inclusive('\n')
            .take(max_lines)
            .collect();
        let _ = writeln!(
            out,
            "... diff truncated: showing {max_lines} of {total} diff lines ({} lines changed in total)",
            self.lines_changed
        );
        out
    }
}

/// Computes the line edit script turning `old` into `new`.
pub fn edit_script(old: &str, new: &str, timeout: Duration) -> EditScript {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .timeout(timeout)
        .diff_lines(old, new);

    let new_len = new.lines().count();
    let mut script = EditScript::default();
    // New-file lines consumed so far.
    let mut new_cursor = 0usize;

    for change in diff.iter_all_changes() {
        let value = change.value();
        let missing_newline = !value.ends_with('\n');
        let line = value.strip_suffix('\n').unwrap_or(value).to_owned();
        let old_line_no = change.old_index().map(|i| i + 1);
        let new_line_no = change.new_index().map(|i| i + 1);

        let kind = match change.tag() {
            ChangeTag::Equal => {
                new_cursor += 1;
                LineKind::Kept
            }
            ChangeTag::Insert => {
                new_cursor += 1;
                script.changed_new_lines.insert(new_cursor);
                LineKind::Added
            }
            ChangeTag::Delete => {
                let at = (new_cursor + 1).min(new_len.max(1));
                script.changed_new_lines.insert(at);
                LineKind::Removed
            }
        };

        script.entries.push(DiffLine {
            kind,
            line,
            old_line_no,
            new_line_no,
            missing_newline,
        });
    }

    script
}

/// A contiguous run of entries rendered under one `@@` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HunkSpan {
    start: usize,
    end: usize, // exclusive
}

/// Groups change indices into hunk spans with `context` lines either side,
/// merging neighbours whose gap is at most `2 * context + 1` kept lines.
fn group_hunks(entries: &[DiffLine], context: usize) -> Vec<HunkSpan> {
    let changes: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind != LineKind::Kept)
        .map(|(i, _)| i)
        .collect();

    let mut spans: Vec<HunkSpan> = Vec::new();
    let mut prev_change: Option<usize> = None;

    for &idx in &changes {
        let merge = prev_change.is_some_and(|prev| idx - prev - 1 <= 2 * context + 1);
        let end = (idx + context + 1).min(entries.len());
        match spans.last_mut() {
            Some(span) if merge => span.end = end,
            _ => spans.push(HunkSpan {
                start: idx.saturating_sub(context),
                end,
            }),
        }
        prev_change = Some(idx);
    }

    spans
}

/// Renders `entries[span]` as one hunk, header first.
fn render_hunk(out: &mut String, entries: &[DiffLine], span: HunkSpan) {
    let slice = &entries[span.start..span.end];

    // Lines of each side that precede the hunk.
    let old_before = entries[..span.start]
        .iter()
        .filter(|e| e.kind != LineKind::Added)
        .count();
    let new_before = entries[..span.start]
        .iter()
        .filter(|e| e.kind != LineKind::Removed)
        .count();
    let old_count = slice.iter().filter(|e| e.kind != LineKind::Added).count();
    let new_count = slice.iter().filter(|e| e.kind != LineKind::Removed).count();

    // An empty side points at the line before the hunk, as in `diff -u`.
    let old_start = if old_count == 0 { old_before } else { old_before + 1 };
    let new_start = if new_count == 0 { new_before } else { new_before + 1 };

    let _ = writeln!(out, "@@ -{old_start},{old_count} +{new_start},{new_count} @@");
    for entry in slice {
        out.push(entry.kind.prefix());
        out.push_str(&entry.line);
        out.push('\n');
        if entry.missing_newline {
            out.push_str(NO_NEWLINE_MARKER);
            out.push('\n');
        }
    }
}

/// Diffs `old` against `new` and renders a unified diff labelled with
/// `old_label`/`new_label` in the two-line file header.
///
/// Returns an empty result with `has_changes == false` when the edit script
/// keeps every line.
pub fn unified_diff(
    old: &str,
    new: &str,
    old_label: &str,
    new_label: &str,
    opts: &DiffOptions,
) -> DiffResult {
    let script = edit_script(old, new, opts.timeout);
    if !script.has_changes() {
        return DiffResult::default();
    }

    let mut text = String::new();
    let _ = writeln!(text, "--- {old_label}");
    let _ = writeln!(text, "+++ {new_label}");
    for span in group_hunks(&script.entries, opts.context) {
        render_hunk(&mut text, &script.entries, span);
    }

    DiffResult {
        text,
        lines_changed: script.lines_changed(),
        has_changes: true,
        changed_new_lines: script.changed_new_lines,
    }
}
