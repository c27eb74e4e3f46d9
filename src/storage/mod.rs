//! Storage layer: the `SQLite` façade the sync engine runs against.

pub mod schema;
mod sqlite;

pub use sqlite::{ImportCoreResult, ImportOptions, Storage};
