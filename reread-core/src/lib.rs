//! reread-core — session-aware file read cache.
//!
//! The first read of a file in a session returns its content; later reads
//! return an "unchanged" confirmation or a compact diff against what that
//! session saw last. State lives in one WAL-mode SQLite file that any number
//! of processes can share.
//!
//! Entry point is [`db::FileCache`].

pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod guard;
pub mod reconcile;
pub mod schema;
pub mod source;
pub mod store;
pub mod types;

pub use config::CacheConfig;
pub use db::FileCache;
pub use error::{CacheError, Result};
pub use types::{ReadContext, ReadOptions, ReadOutcome};
