//! Backup targets: the top-level directories of the source tree.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::core::errors::{DbkError, Result};
use crate::scanner::dormancy::{EligibilityVerdict, classify};
use crate::scanner::patterns::ExclusionFilter;
use crate::scanner::tree::{EntryKind, TreeSource};

/// One top-level source directory, classified once and then read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub name: String,
    pub source_path: PathBuf,
    pub verdict: EligibilityVerdict,
    /// Included leaf entries relative to the target, sorted.
    pub files: Vec<String>,
    /// Entries the exclusion filter pruned, relative to the source directory.
    pub excluded: Vec<String>,
}

/// Names of the directories directly under the tree root, sorted.
///
/// Files and symlinks at the top level are not targets.
pub fn enumerate_target_names(tree: &dyn TreeSource) -> Result<Vec<String>> {
    let entries = tree
        .list_dir("")
        .map_err(|err| DbkError::SourceUnavailable {
            path: tree.display_path(""),
            details: err.to_string(),
        })?;
    Ok(entries
        .into_iter()
        .filter(|entry| entry.kind == EntryKind::Dir)
        .map(|entry| entry.name)
        .collect())
}

/// Enumerate and classify every target under `source_root`.
pub fn scan_targets(
    tree: &dyn TreeSource,
    source_root: &Path,
    now: DateTime<Utc>,
    age_days: u64,
    filter: &ExclusionFilter,
) -> Result<Vec<BackupTarget>> {
    let names = enumerate_target_names(tree)?;
    Ok(names
        .into_iter()
        .map(|name| {
            let classification = classify(tree, &name, now, age_days, filter);
            BackupTarget {
                source_path: source_root.join(&name),
                verdict: classification.verdict,
                files: classification.files,
                excluded: classification.excluded,
                name,
            }
        })
        .collect())
}
