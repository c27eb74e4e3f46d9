//! Error types and handling for `braid`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Storage failures surface as typed conditions; everything else is
//!   wrapped with context identifying the operation
//! - Supports `anyhow` integration for one-off wrapped errors

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `braid` operations.
#[derive(Error, Debug)]
pub enum BraidError {
    // === Storage Errors ===
    /// The storage façade has been closed; callers must treat this as a no-op.
    #[error("Storage is closed")]
    StoreClosed,

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Issue Errors ===
    /// Issue with the specified ID was not found.
    #[error("Issue not found: {id}")]
    IssueNotFound { id: String },

    /// Issue ID format is invalid.
    #[error("Invalid issue ID format: {id}")]
    InvalidId { id: String },

    /// Invalid status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    // === Sync Errors ===
    /// The JSONL file contains unresolved git merge conflict markers.
    #[error(
        "Merge conflict markers detected in {path} (first at line {line}).\n\
         Resolve the conflict in your editor, or re-export from the database \
         with 'braid sync --flush --full'."
    )]
    ConflictMarkers { path: PathBuf, line: usize },

    /// Failed to parse a line in the JSONL file.
    #[error("JSONL parse error at line {line}: {reason}\n  {snippet}")]
    JsonlParse {
        line: usize,
        reason: String,
        snippet: String,
    },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Braid workspace not initialized.
    #[error("Braid not initialized: run 'braid init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Wrapped errors ===
    /// Error with additional context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BraidError {
    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an error with context identifying the operation.
    #[must_use]
    pub fn context(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True if the storage façade is gone and the operation should be a no-op.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::StoreClosed)
    }

    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::IssueNotFound { .. }
                | Self::Validation { .. }
                | Self::InvalidStatus { .. }
                | Self::InvalidId { .. }
                | Self::ConflictMarkers { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: braid init"),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize"),
            Self::ConflictMarkers { .. } => {
                Some("Resolve the git conflict, then re-run the import")
            }
            Self::InvalidStatus { .. } => {
                Some("Valid statuses: open, in_progress, blocked, closed, tombstone")
            }
            _ => None,
        }
    }

    /// Get the exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Result type using `BraidError`.
pub type Result<T> = std::result::Result<T, BraidError>;
