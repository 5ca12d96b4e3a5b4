#![forbid(unsafe_code)]

//! Dormant Backup (dbk): copies subfolders that nobody has touched for a
//! configurable number of days into timestamped destination folders.
//!
//! Each run moves through four stages:
//! 1. **Scan**: classify every immediate subfolder of the source by the age of
//!    its newest included file
//! 2. **Copy**: mirror eligible subfolders with modification times preserved
//! 3. **Verify**: hash both trees and compare them path by path
//! 4. **Cleanup**: optionally delete sources whose copies verified cleanly
//!
//! # Library usage
//!
//! ```rust,no_run
//! use dormant_backup::prelude::*;
//!
//! let config = Config::load(None)?;
//! let runner = BackupRunner::new(config, None)?;
//! let summary = runner.run(&CancelToken::new())?;
//! println!("{} succeeded", summary.counts.succeeded);
//! # Ok::<(), DbkError>(())
//! ```

pub mod prelude;

pub mod backup;
pub mod core;
pub mod integrity;
pub mod logger;
pub mod scanner;
