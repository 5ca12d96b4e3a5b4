//! Run aggregator: classify every target, copy and clean up the eligible ones,
//! and assemble the [`RunSummary`].
//!
//! Threads: the calling thread dispatches target indices over a bounded
//! crossbeam channel to `parallelism` scoped workers and is also the single
//! collector that slots finished records back into enumeration order.
//!
//! Fatal (returned as `Err`): destination root missing and not creatable, not a
//! directory, zero available bytes, source directory unreadable, run folder not
//! creatable. Everything else is recorded per target.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::{DateTime, Local, Utc};
use crossbeam_channel::{bounded, unbounded};
use parking_lot::Mutex;

use crate::backup::cleanup::SourceCleaner;
use crate::backup::copy::{
    CopyOptions, CopyResult, DestinationWriter, LocalDestination, VerificationStatus, copy_target,
};
use crate::backup::summary::{RunCounts, RunSummary, TargetRecord};
use crate::backup::target::{BackupTarget, scan_targets};
use crate::core::config::Config;
use crate::core::errors::{DbkError, Result};
use crate::core::paths::resolve_absolute_path;
use crate::core::signals::CancelToken;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::dormancy::EligibilityVerdict;
use crate::scanner::patterns::ExclusionFilter;
use crate::scanner::tree::{LocalTree, TreeSource};

/// `strftime` layout of the per-run destination folder.
pub const RUN_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Upper bound on `_N` suffixes tried when the run folder name is taken.
const MAX_RUN_DIR_SUFFIX: u32 = 1000;

/// Drives one backup run over a source tree.
pub struct BackupRunner {
    config: Config,
    source_dir: PathBuf,
    destination_dir: PathBuf,
    filter: ExclusionFilter,
    tree: Box<dyn TreeSource>,
    writer: Box<dyn DestinationWriter>,
    logger: Option<ActivityLoggerHandle>,
}

impl BackupRunner {
    /// Validate `config` and prepare a runner reading the local source directory.
    pub fn new(config: Config, logger: Option<ActivityLoggerHandle>) -> Result<Self> {
        config.validate()?;
        let filter = ExclusionFilter::new(&config.backup.excluded_patterns)?;
        let source_dir = resolve_absolute_path(config.source_dir()?);
        let destination_dir = resolve_absolute_path(config.destination_dir()?);
        Ok(Self {
            tree: Box::new(LocalTree::new(&source_dir)),
            writer: Box::new(LocalDestination),
            config,
            source_dir,
            destination_dir,
            filter,
            logger,
        })
    }

    /// Read targets through `tree` instead of the local filesystem.
    #[must_use]
    pub fn with_tree(mut self, tree: Box<dyn TreeSource>) -> Self {
        self.tree = tree;
        self
    }

    /// Write copied file contents through `writer`.
    #[must_use]
    pub fn with_writer(mut self, writer: Box<dyn DestinationWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn filter(&self) -> &ExclusionFilter {
        &self.filter
    }

    /// Classify every target without copying anything.
    pub fn scan(&self) -> Result<Vec<BackupTarget>> {
        self.classify_all(Utc::now())
    }

    /// Execute the full pipeline.
    ///
    /// `cancel` stops new targets from launching and aborts in-flight copies
    /// between files; the summary is still returned.
    pub fn run(&self, cancel: &CancelToken) -> Result<RunSummary> {
        self.run_at(cancel, Local::now())
    }

    /// [`run`](Self::run) with an explicit start time, which names the run
    /// folder and is the reference point for dormancy.
    pub fn run_at(
        &self,
        cancel: &CancelToken,
        started_at: DateTime<Local>,
    ) -> Result<RunSummary> {
        let now = started_at.with_timezone(&Utc);

        self.preflight_destination()?;
        let targets = self.classify_all(now)?;
        let run_dir = create_run_dir(
            &self.destination_dir,
            &started_at.format(RUN_STAMP_FORMAT).to_string(),
        )?;

        self.log_event(ActivityEvent::RunStarted {
            source_dir: self.source_dir.to_string_lossy().to_string(),
            run_dir: run_dir.to_string_lossy().to_string(),
            config_hash: self.config.stable_hash()?,
            targets: targets.len(),
        });

        let halt_reason: Mutex<Option<String>> = Mutex::new(None);
        let mut slots: Vec<Option<TargetRecord>> = targets
            .iter()
            .map(|target| {
                (!target.verdict.is_eligible()).then(|| TargetRecord::unprocessed(target))
            })
            .collect();
        let eligible: Vec<usize> = targets
            .iter()
            .enumerate()
            .filter(|(_, target)| target.verdict.is_eligible())
            .map(|(idx, _)| idx)
            .collect();

        for (idx, record) in self.process_all(&targets, &eligible, &run_dir, cancel, &halt_reason) {
            slots[idx] = Some(record);
        }

        let records: Vec<TargetRecord> = slots
            .into_iter()
            .zip(&targets)
            .map(|(slot, target)| slot.unwrap_or_else(|| TargetRecord::unprocessed(target)))
            .collect();
        let counts = RunCounts::tally(&records);
        let halt_reason = halt_reason.into_inner();

        let summary = RunSummary {
            started_at,
            finished_at: Local::now(),
            source_dir: self.source_dir.clone(),
            destination_dir: self.destination_dir.clone(),
            run_dir,
            config_hash: self.config.stable_hash()?,
            verify_copy: self.config.backup.verify_copy,
            delete_requested: self.config.backup.delete_source,
            hash_algorithm: self.config.backup.hash_algorithm,
            backup_age_days: self.config.backup.backup_age_days,
            targets: records,
            counts,
            halted: halt_reason.is_some(),
            halt_reason,
            cancelled: cancel.is_cancelled(),
        };

        if let Some(reason) = &summary.halt_reason {
            self.log_event(ActivityEvent::RunHalted {
                reason: reason.clone(),
            });
        }
        self.log_event(ActivityEvent::RunCompleted {
            succeeded: counts.succeeded,
            failed: counts.failed,
            not_eligible: counts.not_eligible,
            scan_errors: counts.scan_errors,
            not_started: counts.not_started,
            duration_ms: summary.duration_ms(),
        });
        Ok(summary)
    }

    // ──────────────────── stages ────────────────────

    fn classify_all(&self, now: DateTime<Utc>) -> Result<Vec<BackupTarget>> {
        let targets = scan_targets(
            self.tree.as_ref(),
            &self.source_dir,
            now,
            self.config.backup.backup_age_days,
            &self.filter,
        )?;
        for target in &targets {
            let cause = match &target.verdict {
                EligibilityVerdict::TooRecent { cause, .. } => cause.clone(),
                _ => None,
            };
            self.log_event(ActivityEvent::TargetClassified {
                target: target.name.clone(),
                verdict: target.verdict.label().to_string(),
                files: target.files.len(),
                excluded: target.excluded.len(),
                patterns: self.matched_patterns(target),
                cause,
            });
        }
        Ok(targets)
    }

    /// Patterns responsible for the target's pruned entries, sorted and deduplicated.
    fn matched_patterns(&self, target: &BackupTarget) -> Vec<String> {
        let mut patterns: Vec<String> = target
            .excluded
            .iter()
            .filter_map(|path| self.filter.matching_pattern(path))
            .map(str::to_string)
            .collect();
        patterns.sort();
        patterns.dedup();
        patterns
    }

    /// Run eligible targets through the worker pool; returns `(index, record)`
    /// pairs for every target that was started.
    fn process_all(
        &self,
        targets: &[BackupTarget],
        eligible: &[usize],
        run_dir: &Path,
        cancel: &CancelToken,
        halt_reason: &Mutex<Option<String>>,
    ) -> Vec<(usize, TargetRecord)> {
        if eligible.is_empty() {
            return Vec::new();
        }
        let workers = self.config.backup.parallelism.clamp(1, eligible.len());
        let halted = AtomicBool::new(false);
        let stop = || cancel.is_cancelled() || halted.load(Ordering::Acquire);

        thread::scope(|scope| {
            let (work_tx, work_rx) = bounded::<usize>(workers);
            let (done_tx, done_rx) = unbounded::<(usize, TargetRecord)>();

            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                let halted = &halted;
                scope.spawn(move || {
                    while let Ok(idx) = work_rx.recv() {
                        // Re-check: the stop condition may have flipped while queued.
                        if stop() {
                            continue;
                        }
                        let record = self.process_target(&targets[idx], run_dir, cancel);
                        if let Some(report) = &record.copy
                            && report.storage_full
                        {
                            halted.store(true, Ordering::Release);
                            halt_reason.lock().get_or_insert_with(|| {
                                format!("destination storage full while copying {}", record.name)
                            });
                        }
                        let _ = done_tx.send((idx, record));
                    }
                });
            }
            drop(work_rx);
            drop(done_tx);

            for &idx in eligible {
                if stop() || work_tx.send(idx).is_err() {
                    break;
                }
            }
            drop(work_tx);

            done_rx.iter().collect()
        })
    }

    fn process_target(
        &self,
        target: &BackupTarget,
        run_dir: &Path,
        cancel: &CancelToken,
    ) -> TargetRecord {
        let options = CopyOptions {
            verify: self.config.backup.verify_copy,
            algorithm: self.config.backup.hash_algorithm,
            filter: &self.filter,
            cancel: Some(cancel),
            writer: self.writer.as_ref(),
        };
        let report = copy_target(target, self.tree.as_ref(), run_dir, &options);

        match &report.result {
            CopyResult::Success => self.log_event(ActivityEvent::TargetCopied {
                target: target.name.clone(),
                files: report.files_copied,
                bytes: report.bytes_copied,
                verified: report.verification == VerificationStatus::Verified,
                duration_ms: report.duration_ms,
            }),
            CopyResult::VerificationMismatch(detail) => {
                self.log_event(ActivityEvent::VerificationMismatch {
                    target: target.name.clone(),
                    missing_from_destination: detail.missing_from_b.len(),
                    unexpected_in_destination: detail.missing_from_a.len(),
                    differing: detail.differing.len(),
                });
            }
            CopyResult::IoFailure { path, cause } => self.log_event(ActivityEvent::CopyFailed {
                target: target.name.clone(),
                path: path.clone(),
                cause: cause.clone(),
            }),
        }

        let delete = SourceCleaner::new(self.logger.clone()).maybe_delete(
            target,
            &report.result,
            self.config.backup.delete_source,
        );
        TargetRecord::processed(target, report, delete)
    }

    // ──────────────────── destination pre-flight ────────────────────

    fn preflight_destination(&self) -> Result<()> {
        let dest = &self.destination_dir;
        let unavailable = |details: String| DbkError::DestinationUnavailable {
            path: dest.clone(),
            details,
        };

        fs::create_dir_all(dest).map_err(|err| unavailable(err.to_string()))?;
        let meta = fs::metadata(dest).map_err(|err| unavailable(err.to_string()))?;
        if !meta.is_dir() {
            return Err(unavailable("not a directory".to_string()));
        }
        if available_bytes(dest) == Some(0) {
            return Err(unavailable("no space available on destination volume".to_string()));
        }
        Ok(())
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

/// Create `<destination>/<stamp>`, adding `_1`, `_2`, ... while the name is taken.
pub fn create_run_dir(destination: &Path, stamp: &str) -> Result<PathBuf> {
    for attempt in 0..=MAX_RUN_DIR_SUFFIX {
        let name = if attempt == 0 {
            stamp.to_string()
        } else {
            format!("{stamp}_{attempt}")
        };
        let candidate = destination.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => {
                return Err(DbkError::DestinationUnavailable {
                    path: candidate,
                    details: err.to_string(),
                });
            }
        }
    }
    Err(DbkError::DestinationUnavailable {
        path: destination.join(stamp),
        details: format!("run folder name taken {MAX_RUN_DIR_SUFFIX} times"),
    })
}

/// Bytes available to unprivileged users on the volume holding `path`.
#[cfg(unix)]
#[allow(clippy::useless_conversion)]
fn available_bytes(path: &Path) -> Option<u64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let fragment = u64::from(stat.fragment_size());
    Some(u64::from(stat.blocks_available()).saturating_mul(fragment))
}

#[cfg(not(unix))]
fn available_bytes(_path: &Path) -> Option<u64> {
    None
}
