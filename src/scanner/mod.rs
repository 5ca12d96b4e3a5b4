//! Target scanning: exclusion patterns, tree traversal, dormancy evaluation.

pub mod dormancy;
pub mod patterns;
pub mod tree;
