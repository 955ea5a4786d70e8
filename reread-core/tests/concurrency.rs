//! Retry guard behaviour and several handles sharing one store file.

mod common;

use std::time::Duration;

use common::Fixture;
use reread_core::guard::{with_retry, RetryPolicy};
use reread_core::{CacheConfig, CacheError, FileCache, ReadContext, ReadOptions};

fn busy_error() -> CacheError {
    CacheError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        None,
    ))
}

#[test]
fn delay_grows_then_caps() {
    let policy = RetryPolicy {
        base: Duration::from_millis(10),
        max_attempts: 10,
    };
    assert_eq!(policy.delay(0, 0.0), Duration::from_millis(10));
    assert_eq!(policy.delay(1, 0.0), Duration::from_millis(20));
    assert_eq!(policy.delay(4, 0.0), Duration::from_millis(50));
    assert_eq!(policy.delay(9, 0.0), Duration::from_millis(50), "multiplier caps at 5");
    assert_eq!(policy.delay(0, 0.5), Duration::from_millis(15), "jitter scales the base");
}

#[test]
fn busy_errors_are_retried() {
    let policy = RetryPolicy {
        base: Duration::from_millis(1),
        max_attempts: 5,
    };
    let mut calls = 0;
    let value = with_retry(&policy, || {
        calls += 1;
        if calls < 3 {
            Err(busy_error())
        } else {
            Ok(calls)
        }
    })
    .unwrap();
    assert_eq!(value, 3, "succeeds on the third attempt");
}

#[test]
fn exhausted_budget_surfaces_store_busy() {
    let policy = RetryPolicy {
        base: Duration::from_millis(1),
        max_attempts: 3,
    };
    let mut calls = 0;
    let err = with_retry(&policy, || -> reread_core::Result<()> {
        calls += 1;
        Err(busy_error())
    })
    .unwrap_err();
    assert!(matches!(err, CacheError::StoreBusy { attempts: 3 }), "got: {err:?}");
    assert_eq!(calls, 3);
}

#[test]
fn other_errors_are_not_retried() {
    let policy = RetryPolicy::default();
    let mut calls = 0;
    let err = with_retry(&policy, || -> reread_core::Result<()> {
        calls += 1;
        Err(CacheError::Config("bad".into()))
    })
    .unwrap_err();
    assert!(matches!(err, CacheError::Config(_)));
    assert_eq!(calls, 1, "non-busy errors propagate immediately");
}

#[tokio::test]
async fn handles_share_one_store() {
    let fx = Fixture::new().await;
    let path = fx.write("shared.txt", "x\n");

    // Two independent connections, as two processes would hold.
    let other = FileCache::open(Fixture::config(fx.dir.path())).await.unwrap();

    let reads = (0..8).map(|i| {
        let cache = if i % 2 == 0 { fx.cache.clone() } else { other.clone() };
        let path = path.clone();
        tokio::spawn(async move {
            let ctx = ReadContext::new(format!("session-{i}"), "main");
            cache.read_file(&ctx, &path, ReadOptions::full()).await
        })
    });
    for handle in reads.collect::<Vec<_>>() {
        let outcome = handle.await.unwrap().unwrap();
        assert!(!outcome.cached, "every session gets its own first read");
    }

    let stats = other.stats(None).await.unwrap();
    assert_eq!(stats.revisions, 1, "content stored once across handles");
    assert_eq!(stats.pointers, 8);
    assert_eq!(stats.reads, 8);
}

#[tokio::test]
async fn held_write_lock_exhausts_retries() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = CacheConfig {
        busy_timeout_ms: 5,
        retry_base_ms: 1,
        retry_max_attempts: 2,
        ..Fixture::config(dir.path())
    };
    let cache = FileCache::open(config.clone()).await.unwrap();
    let file = dir.path().join("locked.txt");
    common::write_file(&file, "content\n");
    let path = file.to_string_lossy().into_owned();

    // Another "process" holds the write lock for the whole call.
    let blocker = rusqlite::Connection::open(&config.db_path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = cache
        .read_file(&ReadContext::new("s", "main"), &path, ReadOptions::full())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::StoreBusy { attempts: 2 }), "got: {err:?}");

    blocker.execute_batch("ROLLBACK;").unwrap();
    let outcome = cache
        .read_file(&ReadContext::new("s", "main"), &path, ReadOptions::full())
        .await
        .unwrap();
    assert!(!outcome.cached, "the failed call left no pointer behind");
}

#[tokio::test]
async fn released_lock_is_waited_out() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = CacheConfig {
        busy_timeout_ms: 5,
        retry_base_ms: 20,
        retry_max_attempts: 10,
        ..Fixture::config(dir.path())
    };
    let cache = FileCache::open(config.clone()).await.unwrap();
    let file = dir.path().join("later.txt");
    common::write_file(&file, "content\n");
    let path = file.to_string_lossy().into_owned();

    let db_path = config.db_path.clone();
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = std::thread::spawn(move || {
        let blocker = rusqlite::Connection::open(&db_path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
        locked_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        blocker.execute_batch("COMMIT;").unwrap();
    });
    locked_rx.recv().unwrap();

    let outcome = cache
        .read_file(&ReadContext::new("s", "main"), &path, ReadOptions::full())
        .await
        .unwrap();
    assert!(!outcome.cached);
    holder.join().unwrap();
}
