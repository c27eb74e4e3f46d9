//! Shared utilities for `braid`.
//!
//! Common functionality used across modules:
//! - Identity fingerprints and content hashing (SHA256)
//! - Id parsing and numeric allocation
//! - Time formatting (RFC3339, nanosecond precision)
//! - Progress indicators (for long-running operations)

pub mod hash;
pub mod id;
pub mod progress;
pub mod time;

pub use hash::{fingerprint_from_parts, identity_fingerprint, sha256_hex};
pub use id::{
    allocate_id, is_valid_id_format, max_numeric_suffix, numeric_suffix, prefix_of,
    require_valid_id, suffix_of, validate_prefix,
};
pub use time::{now_stamp, parse_rfc3339, rfc3339_nanos};
