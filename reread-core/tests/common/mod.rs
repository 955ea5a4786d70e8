//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use reread_core::{CacheConfig, FileCache};

/// Fake mtimes, one second apart, so back-to-back writes never share a stamp.
static NEXT_MTIME: AtomicU64 = AtomicU64::new(1_600_000_000);

/// Writes `content` to `path` and gives it a fresh, strictly increasing mtime.
pub fn write_file(path: &Path, content: &str) {
    write_bytes(path, content.as_bytes());
}

/// Like `write_file`, for content that is not valid UTF-8.
pub fn write_bytes(path: &Path, content: &[u8]) {
    std::fs::write(path, content).unwrap();
    let stamp = NEXT_MTIME.fetch_add(1, Ordering::SeqCst);
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(stamp))
        .unwrap();
}

/// `"line 1\n" .. "line n\n"`.
pub fn numbered_lines(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("line {i}")).collect()
}

pub fn join_lines(lines: &[String]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub cache: FileCache,
}

impl Fixture {
    pub fn config(dir: &Path) -> CacheConfig {
        CacheConfig {
            db_path: dir.join("cache.db"),
            ..CacheConfig::default()
        }
    }

    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut CacheConfig)) -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Self::config(dir.path());
        tweak(&mut config);
        let cache = FileCache::open(config).await.unwrap();
        Self { dir, cache }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes `content` to `name` and returns the store key for it.
    pub fn write(&self, name: &str, content: &str) -> String {
        let path = self.path(name);
        write_file(&path, content);
        path.to_string_lossy().into_owned()
    }

    pub fn write_bytes(&self, name: &str, content: &[u8]) -> String {
        let path = self.path(name);
        write_bytes(&path, content);
        path.to_string_lossy().into_owned()
    }
}
