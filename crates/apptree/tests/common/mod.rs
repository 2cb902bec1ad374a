//! Shared test utilities for apptree integration tests.
//!
//! This module provides:
//! - `TestHarness` for running the codec against an isolated temp directory
//! - Builders for assembling application documents programmatically

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
