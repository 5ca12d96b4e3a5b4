//! Content digests for files and whole trees.
//!
//! Files are streamed in [`DIGEST_CHUNK_BYTES`] chunks so memory stays bounded
//! regardless of file size. MD5 is the default: the goal is detecting
//! accidental corruption, not resisting an adversary.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{DbkError, Result};
use crate::scanner::patterns::ExclusionFilter;
use crate::scanner::tree::{EntryKind, LocalTree, TreeSource, walk};

/// Read buffer size for hashing.
pub const DIGEST_CHUNK_BYTES: usize = 64 * 1024;

/// Supported content hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of the hex digest this algorithm produces.
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unknown hash algorithm {other:?} (expected md5 or sha256)")),
        }
    }
}

enum StreamHasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl StreamHasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => to_hex(&h.finalize()),
            Self::Sha256(h) => to_hex(&h.finalize()),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

/// Hash everything `reader` yields.
pub fn digest_reader(mut reader: impl Read, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut hasher = StreamHasher::new(algorithm);
    let mut buffer = vec![0u8; DIGEST_CHUNK_BYTES];
    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hasher.finalize_hex())
}

/// Hash an in-memory buffer.
pub fn digest_bytes(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = StreamHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Hash one file on disk.
pub fn digest_file(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let file = fs::File::open(path).map_err(|err| DbkError::io(path, err))?;
    digest_reader(file, algorithm).map_err(|err| DbkError::io(path, err))
}

/// One file's content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    pub path: String,
    pub hash: String,
}

/// Relative path → digest, ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestSet {
    algorithm: HashAlgorithm,
    entries: BTreeMap<String, FileDigest>,
}

impl DigestSet {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            entries: BTreeMap::new(),
        }
    }

    pub const fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Insert or replace the digest for `path`.
    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        let path = path.into();
        self.entries.insert(
            path.clone(),
            FileDigest {
                path,
                hash: hash.into(),
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<&FileDigest> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileDigest> {
        self.entries.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Digest every included leaf under `prefix`.
///
/// Keys are relative to `prefix`, so a source target and its copy yield the
/// same keys. Symlinks hash the text of their target rather than following it.
pub fn digest_tree(
    tree: &dyn TreeSource,
    prefix: &str,
    filter: &ExclusionFilter,
    algorithm: HashAlgorithm,
) -> Result<DigestSet> {
    let outcome = walk(tree, prefix, filter)?;
    let mut set = DigestSet::new(algorithm);
    for item in outcome.leaves() {
        let location = || tree.display_path(&item.rel_path);
        let hash = match item.entry.kind {
            EntryKind::Symlink => {
                let target = tree
                    .read_link(&item.rel_path)
                    .map_err(|err| DbkError::io(location(), err))?;
                digest_bytes(target.to_string_lossy().as_bytes(), algorithm)
            }
            _ => {
                let reader = tree
                    .open_file(&item.rel_path)
                    .map_err(|err| DbkError::io(location(), err))?;
                digest_reader(reader, algorithm).map_err(|err| DbkError::io(location(), err))?
            }
        };
        set.insert(item.local_path.clone(), hash);
    }
    Ok(set)
}

/// Digest a local file or directory.
///
/// A single file yields one entry keyed by its file name.
pub fn digest_local(
    path: &Path,
    filter: &ExclusionFilter,
    algorithm: HashAlgorithm,
) -> Result<DigestSet> {
    let meta = fs::symlink_metadata(path).map_err(|err| DbkError::io(path, err))?;
    if meta.is_dir() {
        return digest_tree(&LocalTree::new(path), "", filter, algorithm);
    }
    let name = path
        .file_name()
        .map_or_else(|| path.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned());
    let mut set = DigestSet::new(algorithm);
    set.insert(name, digest_file(path, algorithm)?);
    Ok(set)
}
