use std::time::{Duration, Instant};

use polyrun::runner::FailureKind;

use super::{assert_no_residue, fixture_request, test_runner};

#[tokio::test]
async fn test_python_runtime_error_reports_stderr() {
    let (runner, _staging) = test_runner();

    let outcome = runner
        .compile_and_run(fixture_request("python", "runtime_error.py"))
        .await
        .expect("Execution call failed");

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::RuntimeFailure));
    assert_eq!(outcome.output, "partial output\n");
    let error = outcome.error.expect("stderr text");
    assert!(error.contains("ValueError: boom"), "unexpected stderr: {error}");
    assert_no_residue(&runner).await;
}

#[tokio::test]
async fn test_unsupported_language_runs_nothing() {
    let (runner, _staging) = test_runner();

    let err = runner
        .compile_and_run(fixture_request("cobol", "hello.c"))
        .await
        .unwrap_err();

    assert!(err.is_client_error());
    assert_eq!(runner.store().residual_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_sleeping_program_times_out() {
    let (runner, _staging) = test_runner();
    let budget = polyrun::types::ResourceLimits::unset().with_wall_time_limit(1.0);

    let start = Instant::now();
    let outcome = runner
        .run_source(fixture_request("python", "sleep.py"), Some(&budget))
        .await
        .expect("Execution call failed");

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::TimedOut));
    assert_no_residue(&runner).await;
}
