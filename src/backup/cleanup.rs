//! Cleanup coordinator: recursive removal of a source target after a
//! successful, verified copy.
//!
//! Pre-flight checks before removal:
//! 1. Deletion was requested and the copy result is `Success`
//! 2. The target had no entries pruned by the exclusion filter (never copied)
//! 3. The source path still exists and is a real directory, not a symlink
//!
//! After removal the path must be gone, otherwise the outcome is `DeleteFailed`.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::backup::copy::CopyResult;
use crate::backup::target::BackupTarget;
use crate::core::errors::{DbkError, Result};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// Why a target was left in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NotRequested,
    CopyNotSuccessful,
    HasExcludedEntries { count: usize },
    PathGone,
    IsSymlink,
    NotADirectory,
}

impl SkipReason {
    pub fn describe(&self) -> String {
        match self {
            Self::NotRequested => "deletion not requested".to_string(),
            Self::CopyNotSuccessful => "copy was not successful".to_string(),
            Self::HasExcludedEntries { count } => {
                format!("{count} excluded entries were not copied")
            }
            Self::PathGone => "source path no longer exists".to_string(),
            Self::IsSymlink => "source path is a symlink".to_string(),
            Self::NotADirectory => "source path is not a directory".to_string(),
        }
    }
}

/// Result of the cleanup stage for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Skipped(SkipReason),
    Deleted,
    DeleteFailed { cause: String },
}

impl DeleteOutcome {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::Deleted => "deleted",
            Self::DeleteFailed { .. } => "delete_failed",
        }
    }
}

/// Removes source targets once their copy is known good.
pub struct SourceCleaner {
    logger: Option<ActivityLoggerHandle>,
}

impl SourceCleaner {
    pub fn new(logger: Option<ActivityLoggerHandle>) -> Self {
        Self { logger }
    }

    /// Delete `target.source_path` when `delete_requested` and `result` is
    /// `Success` and every pre-flight check passes.
    ///
    /// A removal failure never changes the copy result; it is reported as
    /// [`DeleteOutcome::DeleteFailed`].
    pub fn maybe_delete(
        &self,
        target: &BackupTarget,
        result: &CopyResult,
        delete_requested: bool,
    ) -> DeleteOutcome {
        if let Err(reason) = preflight_check(target, result, delete_requested) {
            // "Not requested" is the normal path and not worth an event.
            if reason != SkipReason::NotRequested {
                self.log_event(ActivityEvent::DeletionSkipped {
                    target: target.name.clone(),
                    reason: reason.describe(),
                });
            }
            return DeleteOutcome::Skipped(reason);
        }

        let start = Instant::now();
        match delete_tree(&target.source_path) {
            Ok(()) => {
                self.log_event(ActivityEvent::TargetDeleted {
                    target: target.name.clone(),
                    path: target.source_path.to_string_lossy().to_string(),
                    duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
                DeleteOutcome::Deleted
            }
            Err(err) => {
                self.log_event(ActivityEvent::DeletionFailed {
                    target: target.name.clone(),
                    path: target.source_path.to_string_lossy().to_string(),
                    cause: err.to_string(),
                });
                DeleteOutcome::DeleteFailed {
                    cause: err.to_string(),
                }
            }
        }
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

// ──────────────────── pre-flight checks ────────────────────

fn preflight_check(
    target: &BackupTarget,
    result: &CopyResult,
    delete_requested: bool,
) -> std::result::Result<(), SkipReason> {
    if !delete_requested {
        return Err(SkipReason::NotRequested);
    }
    if !result.is_success() {
        return Err(SkipReason::CopyNotSuccessful);
    }
    if !target.excluded.is_empty() {
        return Err(SkipReason::HasExcludedEntries {
            count: target.excluded.len(),
        });
    }
    let Ok(meta) = fs::symlink_metadata(&target.source_path) else {
        return Err(SkipReason::PathGone);
    };
    if meta.file_type().is_symlink() {
        return Err(SkipReason::IsSymlink);
    }
    if !meta.is_dir() {
        return Err(SkipReason::NotADirectory);
    }
    Ok(())
}

// ──────────────────── deletion ────────────────────

fn delete_tree(path: &Path) -> Result<()> {
    fs::remove_dir_all(path).map_err(|e| DbkError::io(path, e))?;

    // Post-deletion verification: path should be gone.
    if fs::symlink_metadata(path).is_ok() {
        return Err(DbkError::Runtime {
            details: format!("path still exists after deletion: {}", path.display()),
        });
    }
    Ok(())
}
