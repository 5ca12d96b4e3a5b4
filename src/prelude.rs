//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use dormant_backup::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, ConfigOverrides};
pub use crate::core::errors::{DbkError, Result};
pub use crate::core::signals::CancelToken;

// Scanner
pub use crate::scanner::dormancy::EligibilityVerdict;
pub use crate::scanner::patterns::ExclusionFilter;
pub use crate::scanner::tree::{LocalTree, MemoryTree, TreeSource};

// Integrity
pub use crate::integrity::compare::{MatchResult, MismatchDetail, compare};
pub use crate::integrity::digest::{DigestSet, HashAlgorithm, digest_local};
pub use crate::integrity::manifest::{read_manifest, write_manifest_file};

// Backup
pub use crate::backup::cleanup::{DeleteOutcome, SkipReason, SourceCleaner};
pub use crate::backup::copy::{
    CopyReport, CopyResult, DestinationWriter, LocalDestination, VerificationStatus,
};
pub use crate::backup::report::write_reports;
pub use crate::backup::runner::BackupRunner;
pub use crate::backup::summary::{RunSummary, TargetStatus};
pub use crate::backup::target::BackupTarget;

// Logger
pub use crate::logger::activity::{ActivityLoggerHandle, spawn_logger};
