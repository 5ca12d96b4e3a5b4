//! Core types: errors, configuration, paths, cancellation.

pub mod config;
pub mod errors;
pub mod paths;
pub mod signals;
