//! Dormancy evaluation: a target is eligible only when every included file
//! is older than the age threshold.

#![allow(missing_docs)]

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::scanner::patterns::ExclusionFilter;
use crate::scanner::tree::{TreeSource, walk};

/// Classification of one backup target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum EligibilityVerdict {
    Eligible,
    /// Something inside changed recently, or the scan itself failed.
    ///
    /// On a scan failure `newest_modified` is `None` and `cause` explains why.
    TooRecent {
        newest_modified: Option<DateTime<Utc>>,
        cause: Option<String>,
    },
    /// No included files remain after exclusions.
    Empty,
    /// The target directory itself matches an exclusion pattern.
    ExcludedByPattern,
}

impl EligibilityVerdict {
    pub const fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }

    /// Whether classification failed rather than finding a fresh file.
    pub const fn is_scan_error(&self) -> bool {
        matches!(self, Self::TooRecent { cause: Some(_), .. })
    }

    /// Short machine-friendly label.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::TooRecent { cause: Some(_), .. } => "scan_error",
            Self::TooRecent { .. } => "too_recent",
            Self::Empty => "empty",
            Self::ExcludedByPattern => "excluded_by_pattern",
        }
    }
}

/// Verdict plus the file lists the scan produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdict: EligibilityVerdict,
    /// Included leaf entries, relative to the target.
    pub files: Vec<String>,
    /// Pruned entries, relative to the tree root.
    pub excluded: Vec<String>,
}

/// Threshold as a duration. Saturates instead of overflowing.
pub fn age_threshold(age_days: u64) -> Duration {
    i64::try_from(age_days)
        .ok()
        .and_then(Duration::try_days)
        .unwrap_or(Duration::MAX)
}

/// Age of a timestamp relative to `now`; future timestamps count as zero.
pub fn age_of(modified: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(modified).max(Duration::zero())
}

/// Classify the target at `prefix` within `tree`.
pub fn classify(
    tree: &dyn TreeSource,
    prefix: &str,
    now: DateTime<Utc>,
    age_days: u64,
    filter: &ExclusionFilter,
) -> Classification {
    if filter.is_excluded(prefix) {
        return Classification {
            verdict: EligibilityVerdict::ExcludedByPattern,
            files: Vec::new(),
            excluded: vec![prefix.to_string()],
        };
    }

    let outcome = match walk(tree, prefix, filter) {
        Ok(outcome) => outcome,
        Err(err) => {
            return Classification {
                verdict: EligibilityVerdict::TooRecent {
                    newest_modified: None,
                    cause: Some(err.to_string()),
                },
                files: Vec::new(),
                excluded: Vec::new(),
            };
        }
    };

    let newest = outcome
        .leaves()
        .map(|item| DateTime::<Utc>::from(item.entry.modified))
        .max();
    let files: Vec<String> = outcome
        .leaves()
        .map(|item| item.local_path.clone())
        .collect();

    let verdict = match newest {
        None => EligibilityVerdict::Empty,
        Some(newest) if age_of(newest, now) >= age_threshold(age_days) => {
            EligibilityVerdict::Eligible
        }
        Some(newest) => EligibilityVerdict::TooRecent {
            newest_modified: Some(newest),
            cause: None,
        },
    };

    Classification {
        verdict,
        files,
        excluded: outcome.excluded,
    }
}

/// Verdict only.
pub fn evaluate(
    tree: &dyn TreeSource,
    prefix: &str,
    now: DateTime<Utc>,
    age_days: u64,
    filter: &ExclusionFilter,
) -> EligibilityVerdict {
    classify(tree, prefix, now, age_days, filter).verdict
}
