//! `braid`: a local-first, git-native issue tracker.
//!
//! Durable state lives in two coupled representations: a SQLite database
//! (the authoritative operational store) and a line-delimited JSON file
//! (the git-committed, human-readable, mergeable form). The [`sync`]
//! module keeps them coherent across concurrent mutations, process
//! restarts, out-of-band edits, and multi-worktree sharing.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod storage;
pub mod sync;
pub mod util;

pub use error::{BraidError, Result};
