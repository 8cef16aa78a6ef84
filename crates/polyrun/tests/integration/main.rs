//! Integration tests for polyrun
//!
//! These tests run the built-in language table against real toolchains
//! (gcc, g++, python3, javac, node, tsc, go, rustc, mcs/mono).
//! Run with: cargo test -p polyrun --features toolchain-tests
//!
//! Tests that need network access are marked `#[ignore]`. To include them:
//!    cargo test -p polyrun --features toolchain-tests -- --include-ignored

#![cfg(feature = "toolchain-tests")]

use std::fs;

use polyrun::config::Config;
use polyrun::runner::{Runner, SubmissionRequest};
use tempfile::TempDir;

mod compilation;
mod compile_and_run;
mod config_loading;
mod execution;
mod install;
mod resource_limits;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> Vec<u8> {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Submission for a fixture, uploaded under its own file name
pub(crate) fn fixture_request(language: &str, name: &str) -> SubmissionRequest {
    SubmissionRequest::new(language, fixture_source(name)).with_file_name(name)
}

/// Runner over the built-in language table, staging into a fresh directory.
///
/// The returned `TempDir` must outlive the runner.
pub(crate) fn test_runner() -> (Runner, TempDir) {
    let staging = tempfile::tempdir().expect("Failed to create staging dir");
    let mut config = Config::default();
    config.staging_dir = staging.path().join("requests");
    // Toolchains such as javac and tsc are slow to start on CI machines
    config.request_timeout = 60.0;
    (Runner::new(config), staging)
}

/// Assert that no request directory outlived its request
pub(crate) async fn assert_no_residue(runner: &Runner) {
    let residual = runner
        .store()
        .residual_entries()
        .await
        .expect("Failed to list staging dir");
    assert_eq!(residual, 0, "request directories left behind");
}
