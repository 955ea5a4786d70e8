//! Collaborators the cache consumes but never implements inline: the
//! filesystem, the content hash, the wall clock and the branch label.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Branch label used when no branch can be resolved.
pub const UNKNOWN_BRANCH: &str = "unknown";

/// Filesystem access used by the mtime index.
pub trait FileSource: Send + Sync {
    /// Returns the file's modification time in Unix millis.
    fn mtime_ms(&self, path: &str) -> std::io::Result<i64>;

    /// Returns the full file content.
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>>;
}

/// `FileSource` over the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskSource;

impl FileSource for DiskSource {
    fn mtime_ms(&self, path: &str) -> std::io::Result<i64> {
        let modified = std::fs::metadata(path)?.modified()?;
        Ok(system_time_ms(modified))
    }

    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// Wall clock used for `created_at`/`last_read_at` stamps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        system_time_ms(SystemTime::now())
    }
}

fn system_time_ms(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Hex-encoded SHA-256 of `bytes`. Two revisions with the same hash are
/// treated as byte-identical.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Best-effort branch lookup. Implementations return `UNKNOWN_BRANCH`
/// rather than failing.
pub trait BranchResolver: Send + Sync {
    fn current_branch(&self, dir: &Path) -> String;
}

/// Resolves the checked-out branch of the repository containing `dir`.
///
/// Detached HEADs resolve to the short commit id; anything else that goes
/// wrong (no repository, unborn HEAD) resolves to `UNKNOWN_BRANCH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitBranchResolver;

impl BranchResolver for GitBranchResolver {
    fn current_branch(&self, dir: &Path) -> String {
        let repo = match git2::Repository::discover(dir) {
            Ok(r) => r,
            Err(_) => return UNKNOWN_BRANCH.to_owned(),
        };
        let head = match repo.head() {
            Ok(h) => h,
            Err(_) => return UNKNOWN_BRANCH.to_owned(),
        };
        if head.is_branch() {
            if let Some(name) = head.shorthand() {
                return name.to_owned();
            }
        }
        head.target()
            .map(|oid| oid.to_string().chars().take(12).collect())
            .unwrap_or_else(|| UNKNOWN_BRANCH.to_owned())
    }
}

/// A resolver that always answers with the same label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBranch(pub String);

impl BranchResolver for FixedBranch {
    fn current_branch(&self, _dir: &Path) -> String {
        self.0.clone()
    }
}

/// Mints a fresh session id (UUID v4 text).
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
