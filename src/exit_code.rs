//! Exit codes from mutate4swift.
//!
//! Automation only needs to distinguish "clean" from "found problems"; other
//! kinds of failure get their own values so CI logs are easier to read.

/// Baseline passed, every mutant was caught, no stale backup left behind.
pub const SUCCESS: i32 = 0;

/// One or more mutants survived, or the build-error budget was exceeded.
pub const FOUND_PROBLEMS: i32 = 1;

/// The tests are already failing in an unmutated tree.
pub const BASELINE_FAILED: i32 = 4;

/// The wrong arguments, etc.
pub const USAGE: i32 = 64;

/// An internal software error, from sysexit.
pub const SOFTWARE: i32 = 70;
