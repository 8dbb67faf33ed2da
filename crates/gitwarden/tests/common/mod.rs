//! Shared test utilities for gitwarden integration tests.
//!
//! This module provides:
//! - In-memory fakes for git, the cluster and the sync marker
//! - `TestHarness` wiring them into a workspace and a sync cycle

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::*;
