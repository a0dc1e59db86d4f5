//! Common utilities for the sample app suites.

#![allow(dead_code)]

use anyhow::ensure;
use sample_tests::harness_core::ProbeResponse;
use sample_tests::{HarnessContext, SampleApp};

/// Deploys `app` and connects to the control plane.
///
/// This is the main entry point for sample suites.
pub async fn setup(app: SampleApp) -> HarnessContext {
    HarnessContext::setup(app)
        .await
        .expect("Sample app deployment failed - run 'cf login' and check vars.yml first")
}

/// Sample suites deploy real applications, so they only run when
/// RUN_SAMPLE_TESTS is set.
pub fn should_skip() -> bool {
    std::env::var("RUN_SAMPLE_TESTS").is_err()
}

/// Runs `checks` against `context` and tears the deployment down whatever
/// the outcome. Check failures are reported before teardown failures.
pub async fn finish(context: HarnessContext, checks: anyhow::Result<()>) {
    let teardown = context.teardown().await;
    if let Err(e) = checks {
        if let Err(cleanup) = teardown {
            eprintln!("Teardown also failed: {cleanup:#}");
        }
        panic!("Sample checks failed: {e:#}");
    }
    teardown.expect("Teardown failed");
}

/// Fails unless `response` carries `status`.
pub fn expect_status(response: &ProbeResponse, status: u16, path: &str) -> anyhow::Result<()> {
    ensure!(
        response.status == status,
        "GET {path}: expected {status}, got {} ({})",
        response.status,
        response.body
    );
    Ok(())
}

/// Fails unless the body of `response` contains `needle`.
pub fn expect_body(response: &ProbeResponse, needle: &str, path: &str) -> anyhow::Result<()> {
    ensure!(
        response.body.contains(needle),
        "GET {path}: expected '{needle}' in body: {}",
        response.body
    );
    Ok(())
}

/// Macro to skip sample suites unless they are enabled.
#[macro_export]
macro_rules! skip_unless_enabled {
    () => {
        if common::should_skip() {
            eprintln!("Skipping sample test (RUN_SAMPLE_TESTS is not set)");
            return;
        }
    };
}
