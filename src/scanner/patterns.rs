//! Exclusion filter: shell-style glob patterns compiled to anchored regexes.
//!
//! A relative path is excluded when any pattern matches either the whole
//! `/`-separated path (relative to the source directory) or its basename, so
//! `*.tmp` targets a name at any depth while `proj/cache/**` targets a subtree.

#![allow(missing_docs)]

use regex::Regex;

use crate::core::errors::{DbkError, Result};

/// Compiled glob pattern for path matching.
#[derive(Debug, Clone)]
struct GlobPattern {
    original: String,
    compiled: Regex,
}

/// Ordered set of exclusion patterns. Matching is a short-circuiting OR.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<GlobPattern>,
}

impl ExclusionFilter {
    /// Compile a list of glob patterns. Fails on the first invalid pattern.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let compiled = patterns
            .iter()
            .map(|pat| {
                Ok(GlobPattern {
                    original: pat.clone(),
                    compiled: glob_to_regex(pat)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns: compiled })
    }

    /// A filter that excludes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether `relative_path` (or its basename) matches any pattern.
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        self.matching_pattern(relative_path).is_some()
    }

    /// The first pattern that excludes `relative_path`, if any.
    pub fn matching_pattern(&self, relative_path: &str) -> Option<&str> {
        if self.patterns.is_empty() {
            return None;
        }
        let normalized = normalize_for_matching(relative_path);
        let basename = normalized.rsplit('/').next().unwrap_or(&normalized);
        self.patterns
            .iter()
            .find(|pat| pat.compiled.is_match(&normalized) || pat.compiled.is_match(basename))
            .map(|pat| pat.original.as_str())
    }
}

/// Validate that a glob pattern can be compiled.
pub fn validate_glob_pattern(pattern: &str) -> Result<()> {
    glob_to_regex(pattern).map(|_| ())
}

/// Convert a shell-style glob pattern to a regex.
///
/// Supports:
/// - `**/` → zero or more leading path components
/// - `**`  → matches any path (including separators)
/// - `*`   → matches anything except `/`
/// - `?`   → matches a single character except `/`
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    if pattern.trim().is_empty() {
        return Err(DbkError::InvalidPattern {
            pattern: pattern.to_string(),
            details: "pattern is empty".to_string(),
        });
    }

    let normalized_pattern = normalize_for_matching(pattern);
    let mut regex_str = String::with_capacity(pattern.len() * 2);
    regex_str.push('^');

    let chars: Vec<char> = normalized_pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }

    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| DbkError::InvalidPattern {
        pattern: pattern.to_string(),
        details: err.to_string(),
    })
}

fn normalize_for_matching(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    slashed.trim_start_matches("./").trim_matches('/').to_string()
}
