//! Backup pipeline: target scan, copy, verify, cleanup, and the run summary.

pub mod cleanup;
pub mod copy;
pub mod report;
pub mod runner;
pub mod summary;
pub mod target;

#[cfg(test)]
mod test_properties;
