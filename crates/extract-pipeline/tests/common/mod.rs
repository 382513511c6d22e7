//! Shared test utilities for extract-pipeline integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated stores on a temp-directory database
//! - Builders for inbound messages

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
