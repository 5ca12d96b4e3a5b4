//! `md5sum`-compatible manifest files: `<hex>  <path>` per line.
//!
//! Paths containing a backslash or newline are escaped the way GNU coreutils
//! does it: the line starts with `\` and the path uses `\\` and `\n`.

#![allow(missing_docs)]

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::core::errors::{DbkError, Result};
use crate::integrity::digest::{DigestSet, HashAlgorithm};

/// Write a manifest to any sink, one line per entry in path order.
pub fn write_manifest(set: &DigestSet, mut out: impl Write) -> io::Result<()> {
    for entry in set.iter() {
        if needs_escape(&entry.path) {
            writeln!(out, "\\{}  {}", entry.hash, escape_path(&entry.path))?;
        } else {
            writeln!(out, "{}  {}", entry.hash, entry.path)?;
        }
    }
    out.flush()
}

/// Write a manifest file, replacing any existing one.
pub fn write_manifest_file(set: &DigestSet, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| DbkError::io(parent, err))?;
    }
    let file = fs::File::create(path).map_err(|err| DbkError::io(path, err))?;
    write_manifest(set, BufWriter::new(file)).map_err(|err| DbkError::io(path, err))
}

/// Render a manifest to a string.
pub fn render_manifest(set: &DigestSet) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_manifest(set, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read a manifest file.
pub fn read_manifest(path: &Path) -> Result<DigestSet> {
    let raw = fs::read_to_string(path).map_err(|err| DbkError::io(path, err))?;
    parse_manifest(&raw, path)
}

/// Parse manifest text. `origin` is only used in error messages.
///
/// The algorithm is inferred from the digest length of the first entry; all
/// entries must agree. Blank lines and `#` comments are skipped. Both text
/// (`hash  path`) and binary (`hash *path`) markers are accepted.
pub fn parse_manifest(raw: &str, origin: &Path) -> Result<DigestSet> {
    let mut set: Option<DigestSet> = None;

    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let err = |details: &str| DbkError::ManifestParse {
            path: origin.to_path_buf(),
            line: line_no,
            details: details.to_string(),
        };

        let trimmed = line.trim_end_matches('\r');
        if trimmed.trim().is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (escaped, body) = trimmed
            .strip_prefix('\\')
            .map_or((false, trimmed), |rest| (true, rest));

        let (hash, rest) = body
            .split_once(' ')
            .ok_or_else(|| err("expected '<hash>  <path>'"))?;
        let raw_path = rest
            .strip_prefix(' ')
            .or_else(|| rest.strip_prefix('*'))
            .ok_or_else(|| err("expected two spaces or ' *' between hash and path"))?;
        if raw_path.is_empty() {
            return Err(err("empty path"));
        }
        if !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(err("digest is not hexadecimal"));
        }
        let algorithm = [HashAlgorithm::Md5, HashAlgorithm::Sha256]
            .into_iter()
            .find(|alg| alg.hex_len() == hash.len())
            .ok_or_else(|| err(&format!("unsupported digest length {}", hash.len())))?;

        let set = set.get_or_insert_with(|| DigestSet::new(algorithm));
        if set.algorithm() != algorithm {
            return Err(err("digest length differs from earlier entries"));
        }
        let path = if escaped {
            unescape_path(raw_path).ok_or_else(|| err("invalid escape sequence in path"))?
        } else {
            raw_path.to_string()
        };
        set.insert(path, hash.to_ascii_lowercase());
    }

    Ok(set.unwrap_or_default())
}

fn needs_escape(path: &str) -> bool {
    path.contains('\\') || path.contains('\n')
}

fn escape_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape_path(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '\\' => out.push('\\'),
                'n' => out.push('\n'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const H1: &str = "5d41402abc4b2a76b9719d911017c592";
    const H2: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn origin() -> PathBuf {
        PathBuf::from("manifest.md5")
    }

    #[test]
    fn renders_md5sum_format_in_path_order() {
        let mut set = DigestSet::new(HashAlgorithm::Md5);
        set.insert("sub/b.txt", H2);
        set.insert("a.txt", H1);
        assert_eq!(render_manifest(&set), format!("{H1}  a.txt\n{H2}  sub/b.txt\n"));
    }

    #[test]
    fn parses_text_and_binary_markers() {
        let raw = format!("# generated\n{H1}  a file.txt\n\n{} *bin.dat\r\n", H2.to_uppercase());
        let set = parse_manifest(&raw, &origin()).unwrap();
        assert_eq!(set.algorithm(), HashAlgorithm::Md5);
        assert_eq!(set.get("a file.txt").unwrap().hash, H1);
        assert_eq!(set.get("bin.dat").unwrap().hash, H2);
    }

    #[test]
    fn escaped_paths_survive() {
        let mut set = DigestSet::new(HashAlgorithm::Md5);
        set.insert("odd\\name\nwith newline", H1);
        let rendered = render_manifest(&set);
        assert!(rendered.starts_with('\\'));
        assert_eq!(rendered.lines().count(), 1);
        let parsed = parse_manifest(&rendered, &origin()).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn sha256_length_is_detected() {
        let hash = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let set = parse_manifest(&format!("{hash}  empty\n"), &origin()).unwrap();
        assert_eq!(set.algorithm(), HashAlgorithm::Sha256);
    }

    #[test]
    fn malformed_lines_report_line_number() {
        let raw = format!("{H1}  ok\nnot-a-hash  file\n");
        let err = parse_manifest(&raw, &origin()).unwrap_err();
        assert_eq!(err.code(), "DBK-2201");
        assert!(err.to_string().contains("line 2"), "{err}");

        assert!(parse_manifest(&format!("{H1} single-space"), &origin()).is_err());
        assert!(parse_manifest("abc  short", &origin()).is_err());
    }

    #[test]
    fn mixed_algorithms_rejected() {
        let sha = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let raw = format!("{H1}  a\n{sha}  b\n");
        assert!(parse_manifest(&raw, &origin()).is_err());
    }

    #[test]
    fn file_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("out").join("manifest.md5");
        let mut set = DigestSet::new(HashAlgorithm::Md5);
        set.insert("a.txt", H1);
        write_manifest_file(&set, &path).unwrap();
        assert_eq!(read_manifest(&path).unwrap(), set);
    }
}
