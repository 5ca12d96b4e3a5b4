//! Per-run bookkeeping handed to reports and the CLI as a read-only value.

#![allow(missing_docs)]

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::backup::cleanup::DeleteOutcome;
use crate::backup::copy::{CopyReport, CopyResult, VerificationStatus};
use crate::backup::target::BackupTarget;
use crate::integrity::digest::HashAlgorithm;
use crate::scanner::dormancy::EligibilityVerdict;

/// Where a target ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Succeeded,
    Failed,
    NotEligible,
    ScanError,
    /// Eligible, but the run was cancelled or halted before it started.
    NotStarted,
}

/// Everything the run learned about one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetRecord {
    pub name: String,
    pub source_path: PathBuf,
    pub verdict: EligibilityVerdict,
    pub files: usize,
    pub excluded: usize,
    pub copy: Option<CopyReport>,
    pub delete: Option<DeleteOutcome>,
    pub not_started: bool,
}

impl TargetRecord {
    /// Record for a target that will not be (or was not) copied.
    pub fn unprocessed(target: &BackupTarget) -> Self {
        Self {
            name: target.name.clone(),
            source_path: target.source_path.clone(),
            verdict: target.verdict.clone(),
            files: target.files.len(),
            excluded: target.excluded.len(),
            copy: None,
            delete: None,
            not_started: target.verdict.is_eligible(),
        }
    }

    /// Record for a target that went through copy and cleanup.
    pub fn processed(target: &BackupTarget, copy: CopyReport, delete: DeleteOutcome) -> Self {
        Self {
            copy: Some(copy),
            delete: Some(delete),
            not_started: false,
            ..Self::unprocessed(target)
        }
    }

    pub fn status(&self) -> TargetStatus {
        match (&self.copy, &self.verdict) {
            (Some(report), _) if report.result.is_success() => TargetStatus::Succeeded,
            (Some(_), _) => TargetStatus::Failed,
            (None, verdict) if verdict.is_scan_error() => TargetStatus::ScanError,
            (None, _) if self.not_started => TargetStatus::NotStarted,
            (None, _) => TargetStatus::NotEligible,
        }
    }

    pub fn copy_result(&self) -> Option<&CopyResult> {
        self.copy.as_ref().map(|report| &report.result)
    }

    pub fn verification(&self) -> Option<VerificationStatus> {
        self.copy.as_ref().map(|report| report.verification)
    }
}

/// Aggregate counters derived from the target records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_eligible: usize,
    pub scan_errors: usize,
    pub not_started: usize,
    pub verification_skipped: usize,
    pub deleted: usize,
    pub delete_failed: usize,
    pub bytes_copied: u64,
    pub files_copied: u64,
}

impl RunCounts {
    pub fn tally(records: &[TargetRecord]) -> Self {
        let mut counts = Self {
            total: records.len(),
            ..Self::default()
        };
        for record in records {
            match record.status() {
                TargetStatus::Succeeded => counts.succeeded += 1,
                TargetStatus::Failed => counts.failed += 1,
                TargetStatus::NotEligible => counts.not_eligible += 1,
                TargetStatus::ScanError => counts.scan_errors += 1,
                TargetStatus::NotStarted => counts.not_started += 1,
            }
            if let Some(report) = &record.copy {
                counts.bytes_copied += report.bytes_copied;
                counts.files_copied += report.files_copied;
                if report.result.is_success()
                    && report.verification == VerificationStatus::Skipped
                {
                    counts.verification_skipped += 1;
                }
            }
            match record.delete {
                Some(DeleteOutcome::Deleted) => counts.deleted += 1,
                Some(DeleteOutcome::DeleteFailed { .. }) => counts.delete_failed += 1,
                _ => {}
            }
        }
        counts
    }
}

/// Result of one backup run, in enumeration order.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub source_dir: PathBuf,
    pub destination_dir: PathBuf,
    /// Timestamped folder this run copied into.
    pub run_dir: PathBuf,
    pub config_hash: String,
    pub verify_copy: bool,
    pub delete_requested: bool,
    pub hash_algorithm: HashAlgorithm,
    pub backup_age_days: u64,
    pub targets: Vec<TargetRecord>,
    pub counts: RunCounts,
    /// Launching stopped because the destination ran out of space.
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub cancelled: bool,
}

impl RunSummary {
    /// Wall-clock duration in milliseconds (zero if the clock went backwards).
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(
            self.finished_at
                .signed_duration_since(self.started_at)
                .num_milliseconds(),
        )
        .unwrap_or(0)
    }

    /// Any target that was attempted and did not succeed, or could not be scanned.
    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0 || self.counts.scan_errors > 0 || self.counts.delete_failed > 0
    }

    pub fn records_with_status(&self, status: TargetStatus) -> impl Iterator<Item = &TargetRecord> {
        self.targets
            .iter()
            .filter(move |record| record.status() == status)
    }
}
