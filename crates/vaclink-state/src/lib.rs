//! vaclink State - Last-known-good robot state
//!
//! This crate implements the state tree:
//! - Deep merge of partial updates (union-merge, leaf wins)
//! - Changed-path tracking and tree diff
//! - Atomic snapshots for concurrent readers

pub mod merge;
pub mod tree;

pub use merge::*;
pub use tree::*;
