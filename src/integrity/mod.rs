//! Integrity verification: content digests, set comparison, manifests.

pub mod compare;
pub mod digest;
pub mod manifest;
