//! FerroSync Testing Suite
//!
//! This crate provides integration tests and benchmarks for the FerroSync
//! workspace, plus the fixture entities and node setup they share.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Unified test utilities
///
/// Fixture entity types, in-memory nodes and wire helpers used across the
/// integration tests and benchmarks.
pub mod test_utils;
