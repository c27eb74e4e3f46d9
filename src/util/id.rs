//! Issue id parsing and allocation.
//!
//! Ids are `<prefix>-<suffix>`: the prefix is everything before the first
//! `-` (an id without a dash is its own prefix). Fresh ids allocated
//! during collision remapping use the smallest free numeric suffix within
//! the prefix.

use crate::error::{BraidError, Result};

/// The id prefix: everything before the first `-`.
#[must_use]
pub fn prefix_of(id: &str) -> &str {
    id.split_once('-').map_or(id, |(prefix, _)| prefix)
}

/// The id suffix: everything after the first `-`, if any.
#[must_use]
pub fn suffix_of(id: &str) -> Option<&str> {
    id.split_once('-').map(|(_, suffix)| suffix)
}

/// Numeric suffix of an id, when the suffix parses as an integer.
#[must_use]
pub fn numeric_suffix(id: &str) -> Option<u64> {
    suffix_of(id).and_then(|s| s.parse().ok())
}

/// Basic shape check: non-empty prefix and suffix, no whitespace.
#[must_use]
pub fn is_valid_id_format(id: &str) -> bool {
    if id.chars().any(char::is_whitespace) {
        return false;
    }
    match id.split_once('-') {
        Some((prefix, suffix)) => !prefix.is_empty() && !suffix.is_empty(),
        None => false,
    }
}

/// Validate an id, returning a typed error on bad shape.
///
/// # Errors
///
/// Returns `InvalidId` if the id is not `<prefix>-<suffix>`.
pub fn require_valid_id(id: &str) -> Result<()> {
    if is_valid_id_format(id) {
        Ok(())
    } else {
        Err(BraidError::InvalidId { id: id.to_string() })
    }
}

/// Validate a workspace prefix for use in generated ids.
///
/// # Errors
///
/// Returns a validation error if the prefix is empty, contains `-`, or
/// contains characters outside `[a-z0-9_]`.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(BraidError::validation("prefix", "cannot be empty"));
    }
    if prefix.contains('-') {
        return Err(BraidError::validation("prefix", "cannot contain '-'"));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(BraidError::validation(
            "prefix",
            "must be lowercase alphanumeric",
        ));
    }
    Ok(())
}

/// Allocate the next free numeric id within a prefix.
///
/// `start` is typically one past the highest numeric suffix already in
/// use; `is_taken` closes over both the database and any ids pending in
/// the same batch.
pub fn allocate_id<F>(prefix: &str, start: u64, mut is_taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    let mut n = start.max(1);
    loop {
        let candidate = format!("{prefix}-{n}");
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Highest numeric suffix among `ids` sharing `prefix`, or 0.
pub fn max_numeric_suffix<'a, I>(ids: I, prefix: &str) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    ids.into_iter()
        .filter(|id| prefix_of(id) == prefix)
        .filter_map(numeric_suffix)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_of() {
        assert_eq!(prefix_of("bd-12"), "bd");
        assert_eq!(prefix_of("oss-wisp-3"), "oss");
        assert_eq!(prefix_of("noprefix"), "noprefix");
    }

    #[test]
    fn test_numeric_suffix() {
        assert_eq!(numeric_suffix("bd-12"), Some(12));
        assert_eq!(numeric_suffix("bd-abc"), None);
        assert_eq!(numeric_suffix("bare"), None);
    }

    #[test]
    fn test_is_valid_id_format() {
        assert!(is_valid_id_format("bd-1"));
        assert!(is_valid_id_format("bd-wisp-3"));
        assert!(!is_valid_id_format("bd-"));
        assert!(!is_valid_id_format("-1"));
        assert!(!is_valid_id_format("bare"));
        assert!(!is_valid_id_format("bd 1"));
    }

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("bd").is_ok());
        assert!(validate_prefix("proj_2").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("has-dash").is_err());
        assert!(validate_prefix("Upper").is_err());
    }

    #[test]
    fn test_allocate_id_skips_taken() {
        let taken = ["oss-1", "oss-2", "oss-4"];
        let id = allocate_id("oss", 1, |candidate| taken.contains(&candidate));
        assert_eq!(id, "oss-3");
    }

    #[test]
    fn test_allocate_id_starts_at_one() {
        let id = allocate_id("oss", 0, |_| false);
        assert_eq!(id, "oss-1");
    }

    #[test]
    fn test_max_numeric_suffix() {
        let ids = ["bd-1", "bd-7", "bd-abc", "other-99"];
        assert_eq!(max_numeric_suffix(ids.iter().copied(), "bd"), 7);
        assert_eq!(max_numeric_suffix(ids.iter().copied(), "missing"), 0);
    }
}
