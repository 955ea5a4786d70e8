use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_rusqlite::Connection;
use tracing::{info, instrument};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::guard::{with_retry, RetryPolicy};
use crate::reconcile::Reconciler;
use crate::source::{Clock, DiskSource, FileSource, SystemClock};
use crate::store;
use crate::types::{
    CacheStats, ReadContext, ReadEvent, ReadOptions, ReadOutcome, ReadPointer, RevertOutcome,
    RevisionSummary,
};

/// Opens (or creates) the SQLite database at `path`, configures WAL mode,
/// and applies schema migrations via the `schema_version` table.
///
/// This function is the single entry point for all database connections.
/// It sets `busy_timeout` via the `Connection` method (not a PRAGMA string) to
/// ensure the setting takes effect regardless of pragma caching.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the file cannot be opened, WAL configuration
/// fails, or schema DDL fails.
pub async fn open_db(
    path: &Path,
    busy_timeout: Duration,
) -> std::result::Result<Connection, tokio_rusqlite::Error> {
    let conn = Connection::open(path).await?;

    // WAL pragmas are connection-level settings, re-applied on every open.
    conn.call(move |db| {
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(busy_timeout)?;
        Ok(())
    })
    .await?;

    conn.call(|db| {
        crate::schema::migrate(db)?;
        Ok(())
    })
    .await?;

    Ok(conn)
}

/// Handle to the shared cache store.
///
/// Each public method is one unit of work: a single closure on the connection
/// thread, running one `BEGIN IMMEDIATE` transaction under the retry guard.
/// Several processes may hold a `FileCache` on the same file at once.
#[derive(Clone)]
pub struct FileCache {
    conn: Connection,
    config: Arc<CacheConfig>,
    source: Arc<dyn FileSource>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FileCache {
    /// Opens the store named by `config.db_path` with the local filesystem and
    /// system clock as collaborators.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the parent directory cannot be created or the
    /// database cannot be opened and migrated.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with(config, Arc::new(DiskSource), Arc::new(SystemClock)).await
    }

    /// Opens the store with explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the parent directory cannot be created or the
    /// database cannot be opened and migrated.
    pub async fn open_with(
        config: CacheConfig,
        source: Arc<dyn FileSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = open_db(&config.db_path, config.busy_timeout()).await?;
        info!(db = %config.db_path.display(), "cache store opened");
        Ok(Self {
            conn,
            config: Arc::new(config),
            source,
            clock,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Runs `op` as one immediate transaction on the connection thread,
    /// retrying the whole transaction on lock contention.
    async fn transact<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let policy: RetryPolicy = self.config.retry_policy();
        self.conn
            .call(move |db| {
                with_retry(&policy, || {
                    let tx =
                        db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                    let value = op(&tx)?;
                    tx.commit()?;
                    Ok(value)
                })
            })
            .await
            .map_err(CacheError::from)
    }

    /// Reads `path` for the session in `ctx`, answering with content, an
    /// "unchanged" confirmation or a diff.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotFound` if the file is missing or unreadable (no
    /// state is mutated), `CacheError::StoreBusy` if lock contention outlasts
    /// the retry budget, or another store error.
    #[instrument(skip(self), fields(session = %ctx.session_id, branch = %ctx.branch))]
    pub async fn read_file(
        &self,
        ctx: &ReadContext,
        path: &str,
        opts: ReadOptions,
    ) -> Result<ReadOutcome> {
        let ctx = ctx.clone();
        let path = path.to_owned();
        let config = Arc::clone(&self.config);
        let source = Arc::clone(&self.source);
        let clock = Arc::clone(&self.clock);

        self.transact(move |db| {
            let reconciler = Reconciler {
                source: source.as_ref(),
                config: config.as_ref(),
            };
            reconciler.read(db, &ctx, &path, opts, clock.now_ms())
        })
        .await
    }

    /// Returns the content `steps_back` revisions before the most recently
    /// observed revision of `path` (`0` is the current content).
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InsufficientHistory` if fewer than `steps_back + 1`
    /// revisions are stored, or a store error.
    #[instrument(skip(self))]
    pub async fn revert_file(&self, path: &str, steps_back: usize) -> Result<RevertOutcome> {
        let path = path.to_owned();
        self.transact(move |db| {
            let (revision, available) = store::revision_steps_back(db, &path, steps_back)?;
            match revision {
                Some(rev) => Ok(RevertOutcome {
                    path: rev.path,
                    hash: rev.hash,
                    content: rev.content,
                    steps_back,
                }),
                None => Err(CacheError::InsufficientHistory {
                    path: path.clone(),
                    requested: steps_back,
                    available,
                }),
            }
        })
        .await
    }

    /// Files the session has read on its branch, most recent first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn working_set(&self, ctx: &ReadContext) -> Result<Vec<ReadPointer>> {
        let ctx = ctx.clone();
        self.transact(move |db| Ok(store::list_pointers(db, &ctx.session_id, &ctx.branch)?))
            .await
    }

    /// Stored revisions of `path`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn history(&self, path: &str, limit: usize) -> Result<Vec<RevisionSummary>> {
        let path = path.to_owned();
        self.transact(move |db| Ok(store::list_revisions(db, &path, limit)?))
            .await
    }

    /// Read events recorded for `path`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn read_log(&self, path: &str, limit: usize) -> Result<Vec<ReadEvent>> {
        let path = path.to_owned();
        self.transact(move |db| Ok(store::list_events(db, &path, limit)?))
            .await
    }

    /// Store-wide counters, with read counters limited to `session_id` when given.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn stats(&self, session_id: Option<&str>) -> Result<CacheStats> {
        let session_id = session_id.map(str::to_owned);
        self.transact(move |db| Ok(store::stats(db, session_id.as_deref())?))
            .await
    }

    /// Keeps the newest `keep_per_path` revisions of every path and deletes the
    /// rest. Returns the number of revisions removed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    #[instrument(skip(self))]
    pub async fn prune(&self, keep_per_path: usize) -> Result<usize> {
        let removed = self
            .transact(move |db| Ok(store::prune_revisions(db, keep_per_path, None)?))
            .await?;
        info!(removed, keep_per_path, "pruned revisions");
        Ok(removed)
    }

    /// Runs `f` against the raw connection, outside the retry guard.
    ///
    /// Exposes the underlying tables to read-only projections and tests.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or `CacheError::Connection` if the
    /// connection thread is gone.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        self.conn.call(f).await.map_err(CacheError::from)
    }
}
