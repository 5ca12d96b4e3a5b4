//! JSONL activity log for one backup run.
//!
//! Every entry is serialized to a complete line first and handed to the file in
//! a single `write_all`, so a concurrent `tail -f` never sees half a record.
//!
//! When the run log outgrows `max_size_bytes` it continues in numbered segments
//! (`<stamp>_backup.1.jsonl`, `<stamp>_backup.2.jsonl`, ...). Past
//! `max_segments` further entries are dropped with a single stderr notice.
//!
//! If a file cannot be opened or written the sink degrades one step:
//! primary file, fallback file, stderr (`[DBK-JSONL]` prefix), discard.
//! Logging problems never fail the run.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{DbkError, Result};

const WRITE_BUFFER_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    TargetClassified,
    TargetCopied,
    VerificationMismatch,
    CopyFailed,
    TargetDeleted,
    DeletionSkipped,
    DeletionFailed,
    RunComplete,
    RunHalted,
    Error,
}

/// One line of the activity log. Unset fields are omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC with milliseconds.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Top-level folder the entry is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// `DBK-xxxx` code when the entry reports a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            target: None,
            path: None,
            verdict: None,
            files: None,
            size: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Used when `path` cannot be opened, typically under the temp dir.
    pub fallback_path: Option<PathBuf>,
    /// Size at which the log continues in the next segment.
    pub max_size_bytes: u64,
    /// Extra segments allowed after the first file.
    pub max_segments: u32,
    /// fsync after every `Critical` entry.
    pub sync_on_critical: bool,
}

impl JsonlConfig {
    /// `<log_dir>/<stamp>_backup.jsonl`, falling back to the temp dir.
    pub fn for_run(log_dir: &Path, stamp: &str) -> Self {
        Self {
            path: log_dir.join(format!("{stamp}_backup.jsonl")),
            fallback_path: Some(std::env::temp_dir().join(format!("dbk-{stamp}_backup.jsonl"))),
            ..Self::default()
        }
    }
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: crate::core::config::PathsConfig::default()
                .log_dir
                .join("activity.jsonl"),
            fallback_path: Some(std::env::temp_dir().join("dbk-activity.jsonl")),
            max_size_bytes: 64 * 1024 * 1024,
            max_segments: 8,
            sync_on_critical: true,
        }
    }
}

/// Where lines currently go.
enum Sink {
    Primary(BufWriter<File>),
    Fallback(BufWriter<File>),
    Stderr,
    Discard,
}

impl Sink {
    fn file(&mut self) -> Option<&mut BufWriter<File>> {
        match self {
            Self::Primary(w) | Self::Fallback(w) => Some(w),
            Self::Stderr | Self::Discard => None,
        }
    }
}

/// Append-only writer for a run's activity log.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    /// Base path of the file currently open (primary or fallback).
    base: Option<PathBuf>,
    segment: u32,
    segment_bytes: u64,
    total_bytes: u64,
}

impl JsonlWriter {
    /// Open the log, degrading through the sink chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            sink: Sink::Discard,
            base: None,
            segment: 0,
            segment_bytes: 0,
            total_bytes: 0,
        };
        writer.open_primary();
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        let mut line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("[DBK-JSONL] cannot serialize {:?} entry: {e}", entry.event);
                return;
            }
        };
        line.push('\n');

        self.append(&line);
        if self.config.sync_on_critical && entry.severity == Severity::Critical {
            self.sync();
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.sink.file() {
            let _ = w.flush();
        }
    }

    /// Flush and `sync_data` the current segment.
    pub fn sync(&mut self) {
        if let Some(w) = self.sink.file() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
    }

    /// Flush and sync before the writer is dropped at run end.
    pub fn finish(&mut self) {
        self.sync();
    }

    pub fn state(&self) -> &'static str {
        match self.sink {
            Sink::Primary(_) => "primary",
            Sink::Fallback(_) => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    /// Bytes written to files across all segments.
    pub fn bytes_written(&self) -> u64 {
        self.total_bytes
    }

    // ──────────────────── internals ────────────────────

    fn append(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.segment_bytes > 0 && self.segment_bytes + len > self.config.max_size_bytes {
            self.next_segment();
        }

        let failed = match &mut self.sink {
            Sink::Primary(w) | Sink::Fallback(w) => w.write_all(line.as_bytes()).is_err(),
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[DBK-JSONL] {line}");
                false
            }
            Sink::Discard => false,
        };

        if failed {
            self.degrade();
            self.append(line);
        } else if self.sink.file().is_some() {
            self.segment_bytes += len;
            self.total_bytes += len;
        }
    }

    fn open_primary(&mut self) {
        let path = self.config.path.clone();
        match open_append(&path) {
            Ok((file, size)) => self.use_file(Sink::Primary, path, file, size),
            Err(err) => {
                eprintln!("[DBK-JSONL] cannot open {}: {err}", path.display());
                self.open_fallback();
            }
        }
    }

    fn open_fallback(&mut self) {
        let Some(path) = self.config.fallback_path.clone() else {
            eprintln!("[DBK-JSONL] no fallback log path; writing to stderr");
            self.sink = Sink::Stderr;
            return;
        };
        match open_append(&path) {
            Ok((file, size)) => {
                eprintln!("[DBK-JSONL] logging to fallback {}", path.display());
                self.use_file(Sink::Fallback, path, file, size);
            }
            Err(err) => {
                eprintln!("[DBK-JSONL] cannot open fallback {}: {err}; writing to stderr", path.display());
                self.sink = Sink::Stderr;
            }
        }
    }

    fn use_file(&mut self, wrap: fn(BufWriter<File>) -> Sink, base: PathBuf, file: File, size: u64) {
        self.sink = wrap(BufWriter::with_capacity(WRITE_BUFFER_BYTES, file));
        self.base = Some(base);
        self.segment = 0;
        self.segment_bytes = size;
    }

    fn degrade(&mut self) {
        match self.sink {
            Sink::Primary(_) => {
                self.sink = Sink::Discard;
                self.open_fallback();
            }
            Sink::Fallback(_) => {
                eprintln!("[DBK-JSONL] fallback log write failed; writing to stderr");
                self.sink = Sink::Stderr;
            }
            Sink::Stderr | Sink::Discard => self.sink = Sink::Discard,
        }
    }

    fn next_segment(&mut self) {
        self.flush();
        let Some(base) = self.base.clone() else {
            return;
        };
        if self.segment >= self.config.max_segments {
            eprintln!(
                "[DBK-JSONL] {} reached {} segments; dropping further entries",
                base.display(),
                self.config.max_segments
            );
            self.sink = Sink::Discard;
            return;
        }

        let index = self.segment + 1;
        let path = segment_path(&base, index);
        match open_append(&path) {
            Ok((file, size)) => {
                let file = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
                self.sink = match self.sink {
                    Sink::Fallback(_) => Sink::Fallback(file),
                    _ => Sink::Primary(file),
                };
                self.segment = index;
                self.segment_bytes = size;
            }
            Err(err) => {
                eprintln!("[DBK-JSONL] cannot open segment {}: {err}", path.display());
                self.degrade();
            }
        }
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| DbkError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DbkError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `run_backup.jsonl` → `run_backup.3.jsonl`.
pub fn segment_path(base: &Path, index: u32) -> PathBuf {
    let stem = base
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let name = match base.extension() {
        Some(ext) => format!("{stem}.{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{index}"),
    };
    base.with_file_name(name)
}
