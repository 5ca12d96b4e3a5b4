//! Directory abstraction the pipeline traverses.
//!
//! Every stage (dormancy, digest, copy) reads through [`TreeSource`] using
//! `/`-separated paths relative to the tree root. [`LocalTree`] maps those onto
//! the filesystem without following symlinks; [`MemoryTree`] is an in-memory
//! fake with fault injection for tests.
//!
//! [`walk`] produces the deterministic, name-sorted, depth-first listing that
//! all three stages share, pruning anything the exclusion filter matches.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::errors::{DbkError, Result};
use crate::core::paths::join_slash;
use crate::scanner::patterns::ExclusionFilter;

/// What a directory entry is. Symlinks are reported as themselves, never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// Metadata for one entry, as seen by `lstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
    pub modified: SystemTime,
    pub size_bytes: u64,
}

/// Read-only view of a directory tree.
pub trait TreeSource: Send + Sync {
    /// Children of the directory at `rel`, sorted by name.
    fn list_dir(&self, rel: &str) -> io::Result<Vec<TreeEntry>>;

    /// Metadata of the entry at `rel` (the empty path is the root).
    fn entry(&self, rel: &str) -> io::Result<TreeEntry>;

    /// Open a regular file for streaming reads.
    fn open_file(&self, rel: &str) -> io::Result<Box<dyn Read + '_>>;

    /// Target text of the symlink at `rel`.
    fn read_link(&self, rel: &str) -> io::Result<PathBuf>;

    /// Human-readable location of `rel`, for error messages.
    fn display_path(&self, rel: &str) -> PathBuf;
}

// ──────────────────── local filesystem ────────────────────

/// A tree rooted at a real directory.
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a relative tree path.
    pub fn resolve(&self, rel: &str) -> PathBuf {
        rel.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

fn entry_from_metadata(name: String, meta: &fs::Metadata) -> io::Result<TreeEntry> {
    let file_type = meta.file_type();
    let kind = if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    };
    Ok(TreeEntry {
        name,
        kind,
        modified: meta.modified()?,
        size_bytes: if kind == EntryKind::Dir { 0 } else { meta.len() },
    })
}

impl TreeSource for LocalTree {
    fn list_dir(&self, rel: &str) -> io::Result<Vec<TreeEntry>> {
        let dir = self.resolve(rel);
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&dir)? {
            let dirent = dirent?;
            // Tree paths are UTF-8; a lossy name would not resolve back to the file.
            let Ok(name) = dirent.file_name().into_string() else {
                if rel.is_empty() {
                    eprintln!(
                        "[DBK-SCAN] skipping top-level entry with non-UTF-8 name: {}",
                        dirent.path().display()
                    );
                    continue;
                }
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("file name is not valid UTF-8: {}", dirent.path().display()),
                ));
            };
            let meta = fs::symlink_metadata(dirent.path())?;
            entries.push(entry_from_metadata(name, &meta)?);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn entry(&self, rel: &str) -> io::Result<TreeEntry> {
        let path = self.resolve(rel);
        let meta = fs::symlink_metadata(&path)?;
        let name = rel.rsplit('/').next().unwrap_or_default().to_string();
        entry_from_metadata(name, &meta)
    }

    fn open_file(&self, rel: &str) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(fs::File::open(self.resolve(rel))?))
    }

    fn read_link(&self, rel: &str) -> io::Result<PathBuf> {
        fs::read_link(self.resolve(rel))
    }

    fn display_path(&self, rel: &str) -> PathBuf {
        self.resolve(rel)
    }
}

// ──────────────────── in-memory fake ────────────────────

#[derive(Debug, Clone)]
enum MemNode {
    File { data: Vec<u8>, modified: SystemTime },
    Dir { modified: SystemTime },
    Symlink { target: PathBuf, modified: SystemTime },
}

/// In-memory tree for deterministic tests.
///
/// Parent directories are created implicitly. Paths registered with
/// [`MemoryTree::fail_listing`] or [`MemoryTree::fail_reading`] return
/// `PermissionDenied` on access.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    nodes: BTreeMap<String, MemNode>,
    fail_list: BTreeSet<String>,
    fail_read: BTreeSet<String>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, rel: &str, data: &[u8], modified: SystemTime) -> Self {
        self.add_parents(rel, modified);
        self.nodes.insert(
            rel.to_string(),
            MemNode::File {
                data: data.to_vec(),
                modified,
            },
        );
        self
    }

    #[must_use]
    pub fn with_dir(mut self, rel: &str, modified: SystemTime) -> Self {
        self.add_parents(rel, modified);
        self.nodes
            .insert(rel.to_string(), MemNode::Dir { modified });
        self
    }

    #[must_use]
    pub fn with_symlink(mut self, rel: &str, target: &str, modified: SystemTime) -> Self {
        self.add_parents(rel, modified);
        self.nodes.insert(
            rel.to_string(),
            MemNode::Symlink {
                target: PathBuf::from(target),
                modified,
            },
        );
        self
    }

    #[must_use]
    pub fn fail_listing(mut self, rel: &str) -> Self {
        self.fail_list.insert(rel.to_string());
        self
    }

    #[must_use]
    pub fn fail_reading(mut self, rel: &str) -> Self {
        self.fail_read.insert(rel.to_string());
        self
    }

    fn add_parents(&mut self, rel: &str, modified: SystemTime) {
        let mut prefix = String::new();
        let parts: Vec<&str> = rel.split('/').collect();
        for part in &parts[..parts.len().saturating_sub(1)] {
            prefix = join_slash(&prefix, part);
            self.nodes
                .entry(prefix.clone())
                .or_insert(MemNode::Dir { modified });
        }
    }

    fn node_entry(name: &str, node: &MemNode) -> TreeEntry {
        match node {
            MemNode::File { data, modified } => TreeEntry {
                name: name.to_string(),
                kind: EntryKind::File,
                modified: *modified,
                size_bytes: data.len() as u64,
            },
            MemNode::Dir { modified } => TreeEntry {
                name: name.to_string(),
                kind: EntryKind::Dir,
                modified: *modified,
                size_bytes: 0,
            },
            MemNode::Symlink { target, modified } => TreeEntry {
                name: name.to_string(),
                kind: EntryKind::Symlink,
                modified: *modified,
                size_bytes: target.as_os_str().len() as u64,
            },
        }
    }
}

fn denied(rel: &str) -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, format!("injected fault at {rel}"))
}

fn not_found(rel: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no entry at {rel}"))
}

impl TreeSource for MemoryTree {
    fn list_dir(&self, rel: &str) -> io::Result<Vec<TreeEntry>> {
        if self.fail_list.contains(rel) {
            return Err(denied(rel));
        }
        if !rel.is_empty() && !matches!(self.nodes.get(rel), Some(MemNode::Dir { .. })) {
            return Err(not_found(rel));
        }
        let prefix = if rel.is_empty() {
            String::new()
        } else {
            format!("{rel}/")
        };
        // BTreeMap order is byte order of the full key, which equals name order
        // among siblings only after filtering to direct children.
        let mut children: Vec<TreeEntry> = self
            .nodes
            .iter()
            .filter_map(|(key, node)| {
                let rest = key.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then(|| Self::node_entry(rest, node))
            })
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    fn entry(&self, rel: &str) -> io::Result<TreeEntry> {
        let name = rel.rsplit('/').next().unwrap_or_default();
        if rel.is_empty() {
            return Ok(TreeEntry {
                name: String::new(),
                kind: EntryKind::Dir,
                modified: SystemTime::UNIX_EPOCH,
                size_bytes: 0,
            });
        }
        self.nodes
            .get(rel)
            .map(|node| Self::node_entry(name, node))
            .ok_or_else(|| not_found(rel))
    }

    fn open_file(&self, rel: &str) -> io::Result<Box<dyn Read + '_>> {
        if self.fail_read.contains(rel) {
            return Err(denied(rel));
        }
        match self.nodes.get(rel) {
            Some(MemNode::File { data, .. }) => Ok(Box::new(data.as_slice())),
            _ => Err(not_found(rel)),
        }
    }

    fn read_link(&self, rel: &str) -> io::Result<PathBuf> {
        match self.nodes.get(rel) {
            Some(MemNode::Symlink { target, .. }) => Ok(target.clone()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a symlink: {rel}"),
            )),
        }
    }

    fn display_path(&self, rel: &str) -> PathBuf {
        PathBuf::from(format!("mem://{rel}"))
    }
}

// ──────────────────── shared traversal ────────────────────

/// One included entry found by [`walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedEntry {
    /// Path relative to the tree root (includes the walk prefix).
    pub rel_path: String,
    /// Path relative to the walk prefix.
    pub local_path: String,
    pub entry: TreeEntry,
}

/// Result of walking one subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkOutcome {
    /// Included entries in depth-first, name-sorted pre-order.
    pub entries: Vec<WalkedEntry>,
    /// Tree-root-relative paths the filter pruned (subtrees are not descended).
    pub excluded: Vec<String>,
}

impl WalkOutcome {
    /// Included non-directory entries (files and symlinks).
    pub fn leaves(&self) -> impl Iterator<Item = &WalkedEntry> {
        self.entries
            .iter()
            .filter(|item| item.entry.kind != EntryKind::Dir)
    }
}

/// Walk the subtree at `prefix`, pruning entries the filter excludes.
///
/// Matching is done against the tree-root-relative path, so a tree rooted at
/// the source directory matches `target/...` paths. Any listing error aborts
/// the walk with the offending location.
pub fn walk(tree: &dyn TreeSource, prefix: &str, filter: &ExclusionFilter) -> Result<WalkOutcome> {
    let mut outcome = WalkOutcome::default();
    // Stack of directories still to list; children are pushed in reverse so the
    // smallest name is popped first.
    let mut pending: Vec<(String, String)> = vec![(prefix.to_string(), String::new())];

    while let Some((dir_rel, dir_local)) = pending.pop() {
        let children = tree
            .list_dir(&dir_rel)
            .map_err(|err| DbkError::io(tree.display_path(&dir_rel), err))?;

        let mut subdirs = Vec::new();
        for child in children {
            let rel_path = join_slash(&dir_rel, &child.name);
            let local_path = join_slash(&dir_local, &child.name);
            if filter.is_excluded(&rel_path) {
                outcome.excluded.push(rel_path);
                continue;
            }
            if child.kind == EntryKind::Dir {
                subdirs.push((rel_path.clone(), local_path.clone()));
            }
            outcome.entries.push(WalkedEntry {
                rel_path,
                local_path,
                entry: child,
            });
        }
        pending.extend(subdirs.into_iter().rev());
    }

    // Listing order above is breadth-per-directory; restore a stable global order.
    outcome
        .entries
        .sort_by(|a, b| path_order(&a.local_path, &b.local_path));
    outcome.excluded.sort();
    Ok(outcome)
}

/// Component-wise ordering so `a/b` sorts before `a.txt` like a real walk would.
fn path_order(a: &str, b: &str) -> std::cmp::Ordering {
    a.split('/').cmp(b.split('/'))
}
