//! Run reports written next to the activity log: a human-readable text report
//! and a JSON serialization of the [`RunSummary`].

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::cleanup::DeleteOutcome;
use crate::backup::copy::{CopyResult, VerificationStatus};
use crate::backup::runner::RUN_STAMP_FORMAT;
use crate::backup::summary::{RunSummary, TargetStatus};
use crate::core::errors::{DbkError, Result};
use crate::scanner::dormancy::EligibilityVerdict;

const RULE_WIDTH: usize = 50;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Files produced by [`write_reports`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub text: PathBuf,
    pub json: PathBuf,
}

/// File-name stamp shared by the run folder, the log and both reports.
pub fn run_stamp(summary: &RunSummary) -> String {
    summary.started_at.format(RUN_STAMP_FORMAT).to_string()
}

/// Write `<stamp>_report.txt` and `<stamp>_summary.json` into `log_dir`.
pub fn write_reports(summary: &RunSummary, log_dir: &Path) -> Result<ReportPaths> {
    fs::create_dir_all(log_dir).map_err(|err| DbkError::io(log_dir, err))?;
    let stamp = run_stamp(summary);

    let text = log_dir.join(format!("{stamp}_report.txt"));
    fs::write(&text, render_text_report(summary)).map_err(|err| DbkError::io(&text, err))?;

    let json = log_dir.join(format!("{stamp}_summary.json"));
    let body = serde_json::to_string_pretty(summary)?;
    fs::write(&json, body).map_err(|err| DbkError::io(&json, err))?;

    Ok(ReportPaths { text, json })
}

/// `H:MM:SS.mmm`
pub fn format_duration_ms(ms: u64) -> String {
    let millis = ms % 1000;
    let secs = ms / 1000;
    format!(
        "{}:{:02}:{:02}.{millis:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    )
}

/// Render the text report.
///
/// The header block keeps the classic layout (title, rule, times, counts,
/// failed list); detail sections follow only when they have content.
pub fn render_text_report(summary: &RunSummary) -> String {
    let mut out = String::new();
    let counts = &summary.counts;

    let _ = writeln!(out, "Backup Task Report");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "Start Time: {}", summary.started_at.format(TIME_FORMAT));
    let _ = writeln!(out, "End Time: {}", summary.finished_at.format(TIME_FORMAT));
    let _ = writeln!(
        out,
        "Total Duration: {}",
        format_duration_ms(summary.duration_ms())
    );
    let _ = writeln!(out, "Successful: {}", counts.succeeded);
    let _ = writeln!(out, "Failed: {}", counts.failed);
    let _ = writeln!(out, "Not Eligible: {}", counts.not_eligible);
    let _ = writeln!(out, "Scan Errors: {}", counts.scan_errors);
    let _ = writeln!(out, "Not Started: {}", counts.not_started);
    let _ = writeln!(out, "Source: {}", summary.source_dir.display());
    let _ = writeln!(out, "Destination: {}", summary.run_dir.display());
    if let Some(reason) = &summary.halt_reason {
        let _ = writeln!(out, "HALTED: {reason}");
    }
    if summary.cancelled {
        let _ = writeln!(out, "CANCELLED: run was interrupted");
    }

    let _ = writeln!(out, "\nFailed Files:");
    for record in summary.records_with_status(TargetStatus::Failed) {
        match record.copy_result() {
            Some(CopyResult::IoFailure { path, cause }) => {
                let _ = writeln!(out, "- {} (I/O failure at {path}: {cause})", record.name);
            }
            Some(CopyResult::VerificationMismatch(detail)) => {
                let _ = writeln!(
                    out,
                    "- {} (verification mismatch: {} paths)",
                    record.name,
                    detail.total()
                );
                for path in &detail.missing_from_b {
                    let _ = writeln!(out, "    missing in copy: {path}");
                }
                for path in &detail.missing_from_a {
                    let _ = writeln!(out, "    unexpected in copy: {path}");
                }
                for path in &detail.differing {
                    let _ = writeln!(out, "    content differs: {path}");
                }
            }
            _ => {
                let _ = writeln!(out, "- {}", record.name);
            }
        }
    }

    let scan_errors: Vec<_> = summary
        .records_with_status(TargetStatus::ScanError)
        .collect();
    if !scan_errors.is_empty() {
        let _ = writeln!(out, "\nScan Errors:");
        for record in scan_errors {
            let cause = match &record.verdict {
                EligibilityVerdict::TooRecent {
                    cause: Some(cause), ..
                } => cause.as_str(),
                _ => "unknown",
            };
            let _ = writeln!(out, "- {}: {cause}", record.name);
        }
    }

    let not_started: Vec<_> = summary
        .records_with_status(TargetStatus::NotStarted)
        .collect();
    if !not_started.is_empty() {
        let _ = writeln!(out, "\nNot Started:");
        for record in not_started {
            let _ = writeln!(out, "- {}", record.name);
        }
    }

    let unverified: Vec<_> = summary
        .targets
        .iter()
        .filter(|record| {
            record.status() == TargetStatus::Succeeded
                && record.verification() == Some(VerificationStatus::Skipped)
        })
        .collect();
    if !unverified.is_empty() {
        let _ = writeln!(out, "\nVerification Skipped:");
        for record in unverified {
            let _ = writeln!(out, "- {}", record.name);
        }
    }

    if summary.delete_requested {
        let _ = writeln!(out, "\nSource Cleanup:");
        for record in &summary.targets {
            match &record.delete {
                Some(DeleteOutcome::Deleted) => {
                    let _ = writeln!(out, "- {}: deleted", record.name);
                }
                Some(DeleteOutcome::DeleteFailed { cause }) => {
                    let _ = writeln!(out, "- {}: delete failed: {cause}", record.name);
                }
                Some(DeleteOutcome::Skipped(reason)) => {
                    let _ = writeln!(out, "- {}: kept ({})", record.name, reason.describe());
                }
                None => {}
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::cleanup::SkipReason;
    use crate::backup::copy::CopyReport;
    use crate::backup::summary::{RunCounts, TargetRecord};
    use crate::backup::target::BackupTarget;
    use crate::integrity::compare::MismatchDetail;
    use crate::integrity::digest::HashAlgorithm;
    use chrono::{Local, TimeZone};

    fn target(name: &str, verdict: EligibilityVerdict) -> BackupTarget {
        BackupTarget {
            name: name.to_string(),
            source_path: PathBuf::from("/src").join(name),
            verdict,
            files: vec!["f".to_string()],
            excluded: Vec::new(),
        }
    }

    fn copy(result: CopyResult, verification: VerificationStatus) -> CopyReport {
        CopyReport {
            result,
            verification,
            destination: PathBuf::from("/dst/20240301_101500"),
            files_copied: 1,
            bytes_copied: 1,
            dirs_created: 1,
            duration_ms: 1,
            storage_full: false,
        }
    }

    fn sample() -> RunSummary {
        let targets = vec![
            TargetRecord::processed(
                &target("alpha", EligibilityVerdict::Eligible),
                copy(CopyResult::Success, VerificationStatus::Skipped),
                DeleteOutcome::Deleted,
            ),
            TargetRecord::processed(
                &target("beta", EligibilityVerdict::Eligible),
                copy(
                    CopyResult::VerificationMismatch(MismatchDetail {
                        missing_from_b: vec!["gone.txt".to_string()],
                        missing_from_a: Vec::new(),
                        differing: vec!["data.bin".to_string()],
                    }),
                    VerificationStatus::Mismatch,
                ),
                DeleteOutcome::Skipped(SkipReason::CopyNotSuccessful),
            ),
            TargetRecord::unprocessed(&target(
                "gamma",
                EligibilityVerdict::TooRecent {
                    newest_modified: None,
                    cause: Some("permission denied".to_string()),
                },
            )),
        ];
        let started_at = Local.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        RunSummary {
            started_at,
            finished_at: started_at + chrono::Duration::milliseconds(62_500),
            source_dir: PathBuf::from("/src"),
            destination_dir: PathBuf::from("/dst"),
            run_dir: PathBuf::from("/dst/20240301_101500"),
            config_hash: "0000000000000000".to_string(),
            verify_copy: true,
            delete_requested: true,
            hash_algorithm: HashAlgorithm::Md5,
            backup_age_days: 30,
            counts: RunCounts::tally(&targets),
            targets,
            halted: false,
            halt_reason: None,
            cancelled: false,
        }
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration_ms(0), "0:00:00.000");
        assert_eq!(format_duration_ms(62_500), "0:01:02.500");
        assert_eq!(format_duration_ms(3_723_004), "1:02:03.004");
    }

    #[test]
    fn text_report_keeps_classic_header() {
        let text = render_text_report(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Backup Task Report");
        assert_eq!(lines[1], "=".repeat(50));
        assert!(lines[2].starts_with("Start Time: 2024-03-01 10:15:00"));
        assert_eq!(lines[4], "Total Duration: 0:01:02.500");
        assert_eq!(lines[5], "Successful: 1");
        assert_eq!(lines[6], "Failed: 1");
        assert!(text.contains("\nFailed Files:\n- beta (verification mismatch: 2 paths)"));
    }

    #[test]
    fn text_report_lists_details() {
        let text = render_text_report(&sample());
        assert!(text.contains("    missing in copy: gone.txt"));
        assert!(text.contains("    content differs: data.bin"));
        assert!(text.contains("Scan Errors:\n- gamma: permission denied"));
        assert!(text.contains("Verification Skipped:\n- alpha"));
        assert!(text.contains("- alpha: deleted"));
        assert!(text.contains("- beta: kept (copy was not successful)"));
    }

    #[test]
    fn reports_are_written_with_run_stamp() {
        let tmp = tempfile::TempDir::new().unwrap();
        let summary = sample();
        let paths = write_reports(&summary, &tmp.path().join("logs")).unwrap();
        assert!(paths.text.ends_with("20240301_101500_report.txt"));
        assert!(paths.json.ends_with("20240301_101500_summary.json"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.json).unwrap()).unwrap();
        assert_eq!(json["counts"]["succeeded"], 1);
        assert_eq!(json["targets"][1]["copy"]["result"]["result"], "verification_mismatch");
        assert_eq!(json["targets"][2]["verdict"]["verdict"], "too_recent");
    }
}
