//! Property-based tests for the pipeline invariants.
//!
//! Uses `proptest` to check that the dormancy boundary is exact, that
//! exclusion-only targets are never eligible, that a single-byte mutation is
//! reported against exactly that file, and that cleanup removes a source only
//! after a successful copy it was asked to clean up.

use std::collections::BTreeMap;
use std::fs;
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use super::cleanup::{DeleteOutcome, SourceCleaner};
use super::copy::CopyResult;
use super::target::BackupTarget;
use crate::integrity::compare::{MatchResult, MismatchDetail, compare};
use crate::integrity::digest::{HashAlgorithm, digest_tree};
use crate::scanner::dormancy::{EligibilityVerdict, evaluate};
use crate::scanner::patterns::ExclusionFilter;
use crate::scanner::tree::MemoryTree;

// ──────────────────── strategies ────────────────────

fn arb_copy_result() -> impl Strategy<Value = CopyResult> {
    prop_oneof![
        Just(CopyResult::Success),
        Just(CopyResult::VerificationMismatch(MismatchDetail {
            missing_from_b: Vec::new(),
            missing_from_a: Vec::new(),
            differing: vec!["a.txt".to_string()],
        })),
        "[a-z]{1,8}".prop_map(|cause| CopyResult::IoFailure {
            path: "/src/proj/a.txt".to_string(),
            cause,
        }),
    ]
}

fn arb_files() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(
        "[a-z]{1,6}(/[a-z]{1,6}){0,2}\\.txt",
        prop::collection::vec(any::<u8>(), 1..64),
        1..8,
    )
}

fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).unwrap()
}

fn memory_tree(files: &BTreeMap<String, Vec<u8>>, mtime: SystemTime) -> MemoryTree {
    files.iter().fold(MemoryTree::new(), |tree, (path, data)| {
        tree.with_file(&format!("proj/{path}"), data, mtime)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The source survives unless the copy succeeded, deletion was requested,
    /// and nothing inside was excluded.
    #[test]
    fn deletion_requires_success_and_request(
        result in arb_copy_result(),
        requested in any::<bool>(),
        has_excluded in any::<bool>(),
    ) {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("proj");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub/a.txt"), b"a").unwrap();

        let target = BackupTarget {
            name: "proj".to_string(),
            source_path: dir.clone(),
            verdict: EligibilityVerdict::Eligible,
            files: vec!["sub/a.txt".to_string()],
            excluded: if has_excluded { vec!["proj/x.tmp".to_string()] } else { Vec::new() },
        };
        let outcome = SourceCleaner::new(None).maybe_delete(&target, &result, requested);

        let should_delete = result.is_success() && requested && !has_excluded;
        prop_assert_eq!(outcome == DeleteOutcome::Deleted, should_delete);
        prop_assert_eq!(dir.exists(), !should_delete);
    }

    /// Eligible exactly when the newest file is at least `age_days` old.
    #[test]
    fn dormancy_boundary_is_inclusive(
        age_days in 0u64..400,
        offset_secs in -3_600i64..3_600,
    ) {
        let now = fixed_now();
        let newest = now - Duration::days(i64::try_from(age_days).unwrap()) - Duration::seconds(offset_secs);
        let tree = MemoryTree::new()
            .with_file("proj/old.txt", b"o", SystemTime::from(newest - Duration::days(5)))
            .with_file("proj/newest.txt", b"n", SystemTime::from(newest));

        let verdict = evaluate(&tree, "proj", now, age_days, &ExclusionFilter::empty());
        prop_assert_eq!(verdict.is_eligible(), offset_secs >= 0 || age_days == 0);
    }

    /// A target holding only excluded files is `Empty`, whatever their age.
    #[test]
    fn exclusion_only_target_is_empty(
        names in prop::collection::btree_set("[a-z]{1,8}", 1..6),
        days_old in 0i64..1_000,
    ) {
        let mtime = SystemTime::from(fixed_now() - Duration::days(days_old));
        let tree = names.iter().fold(MemoryTree::new().with_dir("proj", mtime), |tree, name| {
            tree.with_file(&format!("proj/{name}.tmp"), b"x", mtime)
        });
        let filter = ExclusionFilter::new(&["*.tmp".to_string()]).unwrap();
        prop_assert_eq!(
            evaluate(&tree, "proj", fixed_now(), 30, &filter),
            EligibilityVerdict::Empty
        );
    }

    /// Digesting a tree against itself always matches; flipping one byte names
    /// exactly that file as differing.
    #[test]
    fn single_byte_mutation_is_pinpointed(
        files in arb_files(),
        pick in any::<prop::sample::Index>(),
        byte in any::<prop::sample::Index>(),
    ) {
        let mtime = SystemTime::from(fixed_now());
        let filter = ExclusionFilter::empty();
        let original = memory_tree(&files, mtime);
        let baseline = digest_tree(&original, "proj", &filter, HashAlgorithm::Md5).unwrap();
        prop_assert_eq!(compare(&baseline, &baseline), MatchResult::Match);

        let victim = files.keys().nth(pick.index(files.len())).unwrap().clone();
        let mut mutated = files.clone();
        let data = mutated.get_mut(&victim).unwrap();
        let at = byte.index(data.len());
        data[at] ^= 0xff;

        let changed = digest_tree(&memory_tree(&mutated, mtime), "proj", &filter, HashAlgorithm::Md5).unwrap();
        prop_assert_eq!(
            compare(&baseline, &changed),
            MatchResult::Mismatch(MismatchDetail {
                missing_from_b: Vec::new(),
                missing_from_a: Vec::new(),
                differing: vec![victim],
            })
        );
    }
}
