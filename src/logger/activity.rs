//! Activity logger: a dedicated thread owns the `JsonlWriter`.
//!
//! Pipeline stages and workers send `ActivityEvent` via a bounded crossbeam
//! channel. Non-blocking `try_send()` keeps copy workers from ever waiting on
//! logging back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{DbkError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

/// Events emitted during a backup run.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    RunStarted {
        source_dir: String,
        run_dir: String,
        config_hash: String,
        targets: usize,
    },
    TargetClassified {
        target: String,
        verdict: String,
        files: usize,
        excluded: usize,
        /// Distinct patterns that pruned entries of this target.
        patterns: Vec<String>,
        cause: Option<String>,
    },
    TargetCopied {
        target: String,
        files: u64,
        bytes: u64,
        verified: bool,
        duration_ms: u64,
    },
    VerificationMismatch {
        target: String,
        missing_from_destination: usize,
        unexpected_in_destination: usize,
        differing: usize,
    },
    CopyFailed {
        target: String,
        path: String,
        cause: String,
    },
    TargetDeleted {
        target: String,
        path: String,
        duration_ms: u64,
    },
    DeletionSkipped {
        target: String,
        reason: String,
    },
    DeletionFailed {
        target: String,
        path: String,
        cause: String,
    },
    RunCompleted {
        succeeded: usize,
        failed: usize,
        not_eligible: usize,
        scan_errors: usize,
        not_started: usize,
        duration_ms: u64,
    },
    RunHalted {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Thread-safe, cheaply-cloneable handle for sending log events.
///
/// Internally wraps a bounded crossbeam `Sender`. The `send()` method uses
/// `try_send()` so callers are never blocked by logging back-pressure.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking.
    ///
    /// If the channel is full the event is dropped and the dropped-events counter
    /// is incremented.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only until the sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

/// Options for building the activity logger.
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    /// Bounded channel capacity.
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    pub fn new(jsonl_config: JsonlConfig) -> Self {
        Self {
            jsonl_config,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle.
///
/// The returned handle is `Clone + Send` and can be shared across threads.
/// The logger thread runs until `handle.shutdown()` is called or all senders
/// are dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("dbk-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.jsonl_config, &dropped_clone);
        })
        .map_err(|e| DbkError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(rx: &Receiver<ActivityEvent>, jsonl_config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    // Process events until Shutdown or channel disconnect.
    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.finish();
}

// ──────────────────── event conversion ────────────────────

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RunStarted {
            source_dir,
            run_dir,
            config_hash,
            targets,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.path = Some(run_dir.clone());
            e.details = Some(format!(
                "source={source_dir} targets={targets} config_hash={config_hash}"
            ));
            e
        }
        ActivityEvent::TargetClassified {
            target,
            verdict,
            files,
            excluded,
            patterns,
            cause,
        } => {
            let severity = if cause.is_some() {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::TargetClassified, severity).with_target(target);
            e.verdict = Some(verdict.clone());
            e.files = Some(*files as u64);
            e.details = Some(if patterns.is_empty() {
                format!("excluded={excluded}")
            } else {
                format!("excluded={excluded} patterns={}", patterns.join(","))
            });
            e.error_message.clone_from(cause);
            e
        }
        ActivityEvent::TargetCopied {
            target,
            files,
            bytes,
            verified,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::TargetCopied, Severity::Info).with_target(target);
            e.files = Some(*files);
            e.size = Some(*bytes);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e.details = Some(if *verified {
                "verified".to_string()
            } else {
                "verification skipped".to_string()
            });
            e
        }
        ActivityEvent::VerificationMismatch {
            target,
            missing_from_destination,
            unexpected_in_destination,
            differing,
        } => {
            let mut e = LogEntry::new(EventType::VerificationMismatch, Severity::Critical)
                .with_target(target);
            e.ok = Some(false);
            e.details = Some(format!(
                "missing_from_destination={missing_from_destination} \
                 unexpected_in_destination={unexpected_in_destination} differing={differing}"
            ));
            e
        }
        ActivityEvent::CopyFailed {
            target,
            path,
            cause,
        } => {
            let mut e = LogEntry::new(EventType::CopyFailed, Severity::Warning).with_target(target);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_message = Some(cause.clone());
            e
        }
        ActivityEvent::TargetDeleted {
            target,
            path,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::TargetDeleted, Severity::Info).with_target(target);
            e.path = Some(path.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::DeletionSkipped { target, reason } => {
            let mut e =
                LogEntry::new(EventType::DeletionSkipped, Severity::Info).with_target(target);
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::DeletionFailed {
            target,
            path,
            cause,
        } => {
            let mut e =
                LogEntry::new(EventType::DeletionFailed, Severity::Warning).with_target(target);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_message = Some(cause.clone());
            e
        }
        ActivityEvent::RunCompleted {
            succeeded,
            failed,
            not_eligible,
            scan_errors,
            not_started,
            duration_ms,
        } => {
            let severity = if *failed > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::RunComplete, severity);
            e.ok = Some(*failed == 0);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!(
                "succeeded={succeeded} failed={failed} not_eligible={not_eligible} \
                 scan_errors={scan_errors} not_started={not_started}"
            ));
            e
        }
        ActivityEvent::RunHalted { reason } => {
            let mut e = LogEntry::new(EventType::RunHalted, Severity::Critical);
            e.ok = Some(false);
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Warning);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::RunComplete, Severity::Info),
    }
}

// ──────────────────── tests ────────────────────
