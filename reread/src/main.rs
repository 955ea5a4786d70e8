//! reread — command-line front end for the session-aware read cache.
//!
//! Loads config, installs logging, opens the shared store and runs exactly
//! one core call. All cache behaviour lives in `reread-core`.
//!
//! Logging goes to stderr (filtered by `RUST_LOG`, default `warn`) so stdout
//! carries nothing but the requested content.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use reread_core::source::{new_session_id, BranchResolver, GitBranchResolver};
use reread_core::{CacheConfig, CacheError, FileCache, ReadContext, ReadOptions};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "reread", about = "Re-read files cheaply: full content once, then confirmations or diffs")]
struct Cli {
    /// Config file (defaults to ~/.config/reread/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the store location from the config.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Reading session id. Falls back to $REREAD_SESSION, then a fresh id.
    #[arg(long, global = true)]
    session: Option<String>,

    /// Branch label. Resolved from the enclosing git repository when absent.
    #[arg(long, global = true)]
    branch: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read a file, or a line range of it.
    Read {
        path: PathBuf,
        /// First line to read (1-based).
        #[arg(long)]
        offset: Option<usize>,
        /// Number of lines to read.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print (or restore) an earlier stored revision.
    Revert {
        path: PathBuf,
        #[arg(long, default_value_t = 1)]
        steps: usize,
        /// Write the revision back to the file instead of printing it.
        #[arg(long)]
        write: bool,
    },
    /// List stored revisions of a file.
    History {
        path: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List files read by this session on this branch.
    WorkingSet,
    /// Show store counters.
    Stats,
    /// Apply the retention policy to every path.
    Prune {
        /// Revisions kept per path (defaults to `keep_revisions` from config).
        #[arg(long)]
        keep: Option<usize>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Store key for `path`: absolute when it resolves, as given otherwise (the
/// core then reports it as not found).
fn cache_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn read_context(cli: &Cli) -> ReadContext {
    let session_id = cli
        .session
        .clone()
        .or_else(|| std::env::var("REREAD_SESSION").ok())
        .unwrap_or_else(|| {
            let id = new_session_id();
            tracing::info!(session = %id, "no session given, minted a new one");
            id
        });
    let branch = cli.branch.clone().unwrap_or_else(|| {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        GitBranchResolver.current_branch(&cwd)
    });
    ReadContext::new(session_id, branch)
}

async fn run(cli: Cli) -> Result<(), CacheError> {
    let config_file = cli
        .config
        .clone()
        .unwrap_or_else(reread_core::config::config_path);
    let mut config = CacheConfig::load(&config_file)?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    let cache = FileCache::open(config).await?;

    match &cli.command {
        Command::Read {
            path,
            offset,
            limit,
        } => {
            let ctx = read_context(&cli);
            let opts = ReadOptions {
                offset: *offset,
                limit: *limit,
            };
            let outcome = cache.read_file(&ctx, &cache_key(path), opts).await?;
            print!("{}", outcome.content);
            if !outcome.content.ends_with('\n') {
                println!();
            }
        }
        Command::Revert { path, steps, write } => {
            let reverted = cache.revert_file(&cache_key(path), *steps).await?;
            if *write {
                std::fs::write(path, &reverted.content)?;
                eprintln!(
                    "reread: restored {} to revision {} ({} steps back)",
                    path.display(),
                    &reverted.hash[..12.min(reverted.hash.len())],
                    reverted.steps_back
                );
            } else {
                print!("{}", reverted.content);
            }
        }
        Command::History { path, limit } => {
            for rev in cache.history(&cache_key(path), *limit).await? {
                println!("{}  {:>6} lines  {}", rev.hash, rev.line_count, rev.created_at);
            }
        }
        Command::WorkingSet => {
            let ctx = read_context(&cli);
            for pointer in cache.working_set(&ctx).await? {
                println!("{}  {}  {}", pointer.last_read_at, pointer.last_hash, pointer.path);
            }
        }
        Command::Stats => {
            let stats = cache.stats(cli.session.as_deref()).await?;
            println!("revisions      {}", stats.revisions);
            println!("tracked paths  {}", stats.tracked_paths);
            println!("pointers       {}", stats.pointers);
            println!("reads          {}", stats.reads);
            println!("cached reads   {}", stats.cached_reads);
            println!("tokens saved   {}", stats.tokens_saved);
        }
        Command::Prune { keep } => {
            let keep = keep.unwrap_or(cache.config().keep_revisions);
            let removed = cache.prune(keep).await?;
            println!("removed {removed} revisions");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("reread: {e}");
            ExitCode::FAILURE
        }
    }
}
