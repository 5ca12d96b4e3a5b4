//! Copy orchestrator: replicate one eligible target under the run folder,
//! then optionally verify it by digest comparison.
//!
//! Failure semantics:
//! - the first I/O error aborts the target with `IoFailure`; a partial tree is
//!   never verified
//! - cancellation is observed between entries and also yields `IoFailure`
//! - the source tree is only ever read

#![allow(missing_docs)]

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use filetime::FileTime;
use serde::{Deserialize, Serialize};

use crate::backup::target::BackupTarget;
use crate::core::errors::DbkError;
use crate::core::signals::CancelToken;
use crate::integrity::compare::{MatchResult, MismatchDetail, compare};
use crate::integrity::digest::{DIGEST_CHUNK_BYTES, HashAlgorithm, digest_tree};
use crate::scanner::patterns::ExclusionFilter;
use crate::scanner::tree::{EntryKind, LocalTree, TreeSource, walk};

/// Cause recorded when a copy is interrupted by cancellation.
pub const CANCELLED_CAUSE: &str = "cancelled";

/// Per-target copy outcome. Only `Success` lets cleanup act.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CopyResult {
    Success,
    VerificationMismatch(MismatchDetail),
    IoFailure { path: String, cause: String },
}

impl CopyResult {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::VerificationMismatch(_) => "verification_mismatch",
            Self::IoFailure { .. } => "io_failure",
        }
    }
}

/// Whether the copy was checked against its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Mismatch,
    /// Verification was turned off for this run.
    Skipped,
    /// The copy failed before verification could run.
    NotPerformed,
}

/// Outcome plus statistics for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyReport {
    pub result: CopyResult,
    pub verification: VerificationStatus,
    pub destination: PathBuf,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub dirs_created: u64,
    pub duration_ms: u64,
    /// The destination volume reported it is out of space.
    pub storage_full: bool,
}

/// Knobs for [`copy_target`].
#[derive(Clone, Copy)]
pub struct CopyOptions<'a> {
    pub verify: bool,
    pub algorithm: HashAlgorithm,
    pub filter: &'a ExclusionFilter,
    pub cancel: Option<&'a CancelToken>,
    pub writer: &'a dyn DestinationWriter,
}

// ──────────────────── destination writer ────────────────────

/// Creates the files a copy writes into.
///
/// Directories, symlinks and timestamps always go through the local
/// filesystem; only file contents pass through the writer.
pub trait DestinationWriter: Send + Sync {
    /// Create a new file at `path`. An existing file is an error.
    fn create(&self, path: &Path) -> io::Result<Box<dyn DestinationFile>>;
}

/// An open destination file.
pub trait DestinationFile: Write {
    /// Flush contents to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl DestinationFile for fs::File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Writes straight to the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDestination;

impl DestinationWriter for LocalDestination {
    fn create(&self, path: &Path) -> io::Result<Box<dyn DestinationFile>> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Box::new(file))
    }
}

#[derive(Debug, Default)]
struct CopyStats {
    files: u64,
    bytes: u64,
    dirs: u64,
}

/// Why a copy stopped early.
struct Abort {
    path: PathBuf,
    cause: String,
    storage_full: bool,
}

impl Abort {
    fn io(path: &Path, err: &io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            cause: err.to_string(),
            storage_full: err.kind() == io::ErrorKind::StorageFull,
        }
    }

    fn from_error(fallback_path: &Path, err: &DbkError) -> Self {
        let path = match err {
            DbkError::Io { path, .. } | DbkError::PermissionDenied { path } => path.clone(),
            _ => fallback_path.to_path_buf(),
        };
        Self {
            path,
            cause: err.to_string(),
            storage_full: err.is_storage_full(),
        }
    }

    fn cancelled(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            cause: CANCELLED_CAUSE.to_string(),
            storage_full: false,
        }
    }
}

/// Copy `target` from `source_tree` into `destination_root/<name>`.
///
/// `source_tree` must be rooted at the source directory so that exclusion
/// patterns see the same relative paths the dormancy scan saw.
pub fn copy_target(
    target: &BackupTarget,
    source_tree: &dyn TreeSource,
    destination_root: &Path,
    options: &CopyOptions<'_>,
) -> CopyReport {
    let started = Instant::now();
    let destination = destination_root.join(&target.name);
    let mut stats = CopyStats::default();

    let copied = replicate(target, source_tree, &destination, options, &mut stats);
    let (result, verification, storage_full) = match copied {
        Err(abort) => (
            CopyResult::IoFailure {
                path: abort.path.display().to_string(),
                cause: abort.cause,
            },
            VerificationStatus::NotPerformed,
            abort.storage_full,
        ),
        Ok(()) if !options.verify => (CopyResult::Success, VerificationStatus::Skipped, false),
        Ok(()) => match verify(target, source_tree, destination_root, options) {
            Ok(MatchResult::Match) => (CopyResult::Success, VerificationStatus::Verified, false),
            Ok(MatchResult::Mismatch(detail)) => (
                CopyResult::VerificationMismatch(detail),
                VerificationStatus::Mismatch,
                false,
            ),
            Err(abort) => (
                CopyResult::IoFailure {
                    path: abort.path.display().to_string(),
                    cause: abort.cause,
                },
                VerificationStatus::NotPerformed,
                abort.storage_full,
            ),
        },
    };

    CopyReport {
        result,
        verification,
        destination,
        files_copied: stats.files,
        bytes_copied: stats.bytes,
        dirs_created: stats.dirs,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        storage_full,
    }
}

fn replicate(
    target: &BackupTarget,
    source_tree: &dyn TreeSource,
    destination: &Path,
    options: &CopyOptions<'_>,
    stats: &mut CopyStats,
) -> Result<(), Abort> {
    let listing = walk(source_tree, &target.name, options.filter)
        .map_err(|err| Abort::from_error(&target.source_path, &err))?;

    fs::create_dir_all(destination).map_err(|err| Abort::io(destination, &err))?;
    stats.dirs += 1;

    for item in &listing.entries {
        let dest_path = local_join(destination, &item.local_path);
        if options.cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Abort::cancelled(&dest_path));
        }
        let source_display = || source_tree.display_path(&item.rel_path);

        match item.entry.kind {
            EntryKind::Dir => {
                fs::create_dir_all(&dest_path).map_err(|err| Abort::io(&dest_path, &err))?;
                stats.dirs += 1;
            }
            EntryKind::File => {
                let reader = source_tree
                    .open_file(&item.rel_path)
                    .map_err(|err| Abort::io(&source_display(), &err))?;
                let bytes =
                    copy_file_contents(reader, options.writer, &dest_path, &source_display())?;
                set_mtime(&dest_path, item.entry.modified, false)?;
                stats.files += 1;
                stats.bytes += bytes;
            }
            EntryKind::Symlink => {
                let link_target = source_tree
                    .read_link(&item.rel_path)
                    .map_err(|err| Abort::io(&source_display(), &err))?;
                create_symlink(&link_target, &dest_path)?;
                set_mtime(&dest_path, item.entry.modified, true)?;
                stats.files += 1;
            }
        }
    }

    // Directory mtimes last, deepest first, so creating children does not bump them.
    for item in listing
        .entries
        .iter()
        .rev()
        .filter(|item| item.entry.kind == EntryKind::Dir)
    {
        set_mtime(
            &local_join(destination, &item.local_path),
            item.entry.modified,
            false,
        )?;
    }
    let root = source_tree
        .entry(&target.name)
        .map_err(|err| Abort::io(&target.source_path, &err))?;
    set_mtime(destination, root.modified, false)?;

    Ok(())
}

fn verify(
    target: &BackupTarget,
    source_tree: &dyn TreeSource,
    destination_root: &Path,
    options: &CopyOptions<'_>,
) -> Result<MatchResult, Abort> {
    let source = digest_tree(source_tree, &target.name, options.filter, options.algorithm)
        .map_err(|err| Abort::from_error(&target.source_path, &err))?;
    let copy_tree = LocalTree::new(destination_root);
    let copied = digest_tree(&copy_tree, &target.name, options.filter, options.algorithm)
        .map_err(|err| Abort::from_error(&copy_tree.resolve(&target.name), &err))?;
    Ok(compare(&source, &copied))
}

fn local_join(base: &Path, slash_path: &str) -> PathBuf {
    slash_path
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(base.to_path_buf(), |acc, part| acc.join(part))
}

/// Stream `reader` into a new file at `dest` in bounded chunks.
fn copy_file_contents(
    mut reader: impl Read,
    writer: &dyn DestinationWriter,
    dest: &Path,
    source: &Path,
) -> Result<u64, Abort> {
    let mut out = writer.create(dest).map_err(|err| Abort::io(dest, &err))?;
    let mut buffer = vec![0u8; DIGEST_CHUNK_BYTES];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Abort::io(source, &err)),
        };
        out.write_all(&buffer[..n])
            .map_err(|err| Abort::io(dest, &err))?;
        total += n as u64;
    }
    out.sync().map_err(|err| Abort::io(dest, &err))?;
    Ok(total)
}

fn set_mtime(path: &Path, modified: std::time::SystemTime, symlink: bool) -> Result<(), Abort> {
    let mtime = FileTime::from_system_time(modified);
    let outcome = if symlink {
        filetime::set_symlink_file_times(path, mtime, mtime)
    } else {
        filetime::set_file_mtime(path, mtime)
    };
    outcome.map_err(|err| Abort::io(path, &err))
}

#[cfg(unix)]
fn create_symlink(link_target: &Path, dest: &Path) -> Result<(), Abort> {
    std::os::unix::fs::symlink(link_target, dest).map_err(|err| Abort::io(dest, &err))
}

#[cfg(not(unix))]
fn create_symlink(_link_target: &Path, dest: &Path) -> Result<(), Abort> {
    Err(Abort {
        path: dest.to_path_buf(),
        cause: "symbolic links are not supported on this platform".to_string(),
        storage_full: false,
    })
}
