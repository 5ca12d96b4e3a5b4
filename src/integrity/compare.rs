//! Three-way comparison of two digest sets.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::integrity::digest::DigestSet;

/// Why two digest sets disagree. Every list is sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchDetail {
    /// In the first set only (never copied).
    pub missing_from_b: Vec<String>,
    /// In the second set only (unexpected extra).
    pub missing_from_a: Vec<String>,
    /// In both, with different hashes (corrupted).
    pub differing: Vec<String>,
}

impl MismatchDetail {
    pub fn is_empty(&self) -> bool {
        self.missing_from_b.is_empty() && self.missing_from_a.is_empty() && self.differing.is_empty()
    }

    /// Total number of disagreeing paths.
    pub fn total(&self) -> usize {
        self.missing_from_b.len() + self.missing_from_a.len() + self.differing.len()
    }
}

/// Outcome of [`compare`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchResult {
    Match,
    Mismatch(MismatchDetail),
}

impl MatchResult {
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// Sets match iff they hold the same keys and every shared key has the same hash.
pub fn compare(a: &DigestSet, b: &DigestSet) -> MatchResult {
    let mut detail = MismatchDetail::default();

    for entry in a.iter() {
        match b.get(&entry.path) {
            None => detail.missing_from_b.push(entry.path.clone()),
            Some(other) if !other.hash.eq_ignore_ascii_case(&entry.hash) => {
                detail.differing.push(entry.path.clone());
            }
            Some(_) => {}
        }
    }
    detail.missing_from_a = b
        .paths()
        .filter(|path| !a.contains(path))
        .map(ToString::to_string)
        .collect();

    // DigestSet iterates in key order, so the lists are already sorted.
    if detail.is_empty() {
        MatchResult::Match
    } else {
        MatchResult::Mismatch(detail)
    }
}

// ──────────────────── tables ────────────────────

/// CSV table (`path,hash_a,hash_b`) over every path in either set.
///
/// A side that lacks the path gets an empty cell. With `differences_only`,
/// rows whose hashes agree are left out.
pub fn render_comparison_csv(a: &DigestSet, b: &DigestSet, differences_only: bool) -> String {
    let paths: BTreeSet<&str> = a.paths().chain(b.paths()).collect();
    let mut out = String::from("path,hash_a,hash_b\n");
    for path in paths {
        let hash_a = a.get(path).map_or("", |d| d.hash.as_str());
        let hash_b = b.get(path).map_or("", |d| d.hash.as_str());
        if differences_only && hash_a.eq_ignore_ascii_case(hash_b) {
            continue;
        }
        let _ = writeln!(out, "{},{hash_a},{hash_b}", csv_field(path));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::digest::HashAlgorithm;

    fn set(pairs: &[(&str, &str)]) -> DigestSet {
        let mut s = DigestSet::new(HashAlgorithm::Md5);
        for (path, hash) in pairs {
            s.insert(*path, *hash);
        }
        s
    }

    #[test]
    fn identical_sets_match() {
        let a = set(&[("a", "01"), ("b/c", "02")]);
        assert!(compare(&a, &a.clone()).is_match());
        assert!(compare(&DigestSet::default(), &DigestSet::default()).is_match());
    }

    #[test]
    fn hash_case_is_ignored() {
        let a = set(&[("a", "abcdef")]);
        let b = set(&[("a", "ABCDEF")]);
        assert!(compare(&a, &b).is_match());
    }

    #[test]
    fn three_way_breakdown() {
        let a = set(&[("gone", "1"), ("same", "2"), ("z-changed", "3"), ("a-changed", "4")]);
        let b = set(&[("same", "2"), ("z-changed", "x"), ("a-changed", "y"), ("extra", "5")]);
        let MatchResult::Mismatch(detail) = compare(&a, &b) else {
            panic!("expected mismatch");
        };
        assert_eq!(detail.missing_from_b, vec!["gone"]);
        assert_eq!(detail.missing_from_a, vec!["extra"]);
        assert_eq!(detail.differing, vec!["a-changed", "z-changed"]);
        assert_eq!(detail.total(), 4);
    }

    #[test]
    fn swapping_sides_swaps_missing_lists() {
        let a = set(&[("only-a", "1")]);
        let b = set(&[("only-b", "2")]);
        let (MatchResult::Mismatch(ab), MatchResult::Mismatch(ba)) = (compare(&a, &b), compare(&b, &a))
        else {
            panic!("expected mismatches");
        };
        assert_eq!(ab.missing_from_b, ba.missing_from_a);
        assert_eq!(ab.missing_from_a, ba.missing_from_b);
    }

    #[test]
    fn comparison_tables_list_both_hashes() {
        let a = set(&[("gone", "11"), ("same", "22"), ("changed", "33")]);
        let b = set(&[("same", "22"), ("changed", "44"), ("extra", "55")]);

        let full = render_comparison_csv(&a, &b, false);
        assert_eq!(
            full,
            "path,hash_a,hash_b\nchanged,33,44\nextra,,55\ngone,11,\nsame,22,22\n"
        );
        let diff = render_comparison_csv(&a, &b, true);
        assert_eq!(diff, "path,hash_a,hash_b\nchanged,33,44\nextra,,55\ngone,11,\n");
        assert_eq!(render_comparison_csv(&a, &a, true), "path,hash_a,hash_b\n");
    }

    #[test]
    fn csv_paths_are_quoted_when_needed() {
        let a = set(&[("a,b.txt", "01"), ("say \"hi\".txt", "02")]);
        let table = render_comparison_csv(&a, &DigestSet::default(), false);
        assert!(table.contains("\"a,b.txt\",01,\n"));
        assert!(table.contains("\"say \"\"hi\"\".txt\",02,\n"));
    }

    #[test]
    fn mismatch_serializes_with_detail() {
        let result = MatchResult::Mismatch(MismatchDetail {
            differing: vec!["x".to_string()],
            ..MismatchDetail::default()
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["result"], "mismatch");
        assert_eq!(json["differing"][0], "x");
    }
}
