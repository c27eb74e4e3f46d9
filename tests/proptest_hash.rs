//! Property tests for identity fingerprints and id allocation.

use braid::model::Issue;
use braid::util::{
    allocate_id, fingerprint_from_parts, identity_fingerprint, max_numeric_suffix, numeric_suffix,
    prefix_of, sha256_hex,
};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;

fn issue_with(title: &str, created_by: Option<&str>, secs: i64) -> Issue {
    let mut issue = Issue::new("bd-1", title);
    issue.created_at = Utc.timestamp_opt(secs, 0).unwrap();
    issue.updated_at = issue.created_at;
    issue.created_by = created_by.map(String::from);
    issue
}

proptest! {
    #[test]
    fn fingerprint_is_hex_sha256(title in ".{1,100}", secs in 0i64..2_000_000_000) {
        let hash = identity_fingerprint(&issue_with(&title, Some("who"), secs));
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_is_deterministic(title in ".{1,100}", secs in 0i64..2_000_000_000) {
        let a = identity_fingerprint(&issue_with(&title, Some("who"), secs));
        let b = identity_fingerprint(&issue_with(&title, Some("who"), secs));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_ignores_mutable_state(
        title in ".{1,100}",
        desc in ".{0,100}",
        secs in 0i64..2_000_000_000,
    ) {
        let base = issue_with(&title, Some("who"), secs);
        let mut mutated = base.clone();
        mutated.description = Some(desc);
        mutated.updated_at = Utc::now();
        mutated.labels.push("late".to_string());
        prop_assert_eq!(identity_fingerprint(&base), identity_fingerprint(&mutated));
    }

    #[test]
    fn fingerprint_separates_fields(a in "[a-z]{1,20}", b in "[a-z]{1,20}") {
        // Field boundaries are null-separated: concatenation across the
        // boundary must not collide.
        prop_assume!(!a.is_empty() && !b.is_empty());
        let joined = format!("{a}{b}");
        let left = fingerprint_from_parts(&a, &b, None);
        let right = fingerprint_from_parts(&joined, "", None);
        prop_assert_ne!(left, right);
    }

    #[test]
    fn allocated_id_is_fresh_and_prefixed(
        prefix in "[a-z]{1,8}",
        taken in proptest::collection::hash_set(1u64..500, 0..50),
        start in 1u64..500,
    ) {
        let taken_ids: HashSet<String> =
            taken.iter().map(|n| format!("{prefix}-{n}")).collect();
        let id = allocate_id(&prefix, start, |candidate| taken_ids.contains(candidate));
        prop_assert!(!taken_ids.contains(&id));
        prop_assert_eq!(prefix_of(&id), prefix.as_str());
        prop_assert!(numeric_suffix(&id).is_some());
    }

    #[test]
    fn prefix_and_suffix_round_trip(prefix in "[a-z]{1,8}", n in 1u64..1_000_000) {
        let id = format!("{prefix}-{n}");
        prop_assert_eq!(prefix_of(&id), prefix.as_str());
        prop_assert_eq!(numeric_suffix(&id), Some(n));
    }

    #[test]
    fn max_suffix_bounds_allocation(
        prefix in "[a-z]{1,8}",
        suffixes in proptest::collection::vec(1u64..1000, 1..30),
    ) {
        let ids: Vec<String> = suffixes.iter().map(|n| format!("{prefix}-{n}")).collect();
        let max = max_numeric_suffix(ids.iter().map(String::as_str), &prefix);
        prop_assert_eq!(max, *suffixes.iter().max().unwrap());

        // Allocating past the max never collides.
        let id = allocate_id(&prefix, max + 1, |candidate| {
            ids.iter().any(|existing| existing == candidate)
        });
        prop_assert_eq!(numeric_suffix(&id), Some(max + 1));
    }

    #[test]
    fn sha256_hex_shape(bytes in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let hash = sha256_hex(&bytes);
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
