use polyrun::install::DependencyRequest;
use polyrun::runner::FailureKind;

use super::{assert_no_residue, test_runner};

#[tokio::test]
async fn test_injection_attempt_is_rejected_before_spawning() {
    let (runner, _staging) = test_runner();

    let err = runner
        .installer()
        .install(DependencyRequest::new(
            "javascript",
            ["lodash", "lodash; rm -rf /"],
        ))
        .await
        .unwrap_err();

    assert!(err.is_client_error());
    assert_eq!(runner.store().residual_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_java_install_is_unsupported() {
    let (runner, _staging) = test_runner();

    let err = runner
        .installer()
        .install(DependencyRequest::new("java", ["junit"]))
        .await
        .unwrap_err();

    assert!(err.is_client_error());
}

#[tokio::test]
#[ignore = "requires network"]
async fn test_python_install() {
    let (runner, _staging) = test_runner();

    let outcome = runner
        .installer()
        .install(DependencyRequest::new("python", ["six"]))
        .await
        .expect("Install call failed");

    assert!(outcome.success, "pip failed: {:?}", outcome.error);
    assert_no_residue(&runner).await;
}

#[tokio::test]
#[ignore = "requires network"]
async fn test_unknown_package_reports_manager_error() {
    let (runner, _staging) = test_runner();

    let outcome = runner
        .installer()
        .install(DependencyRequest::new(
            "python",
            ["polyrun-definitely-not-a-real-package"],
        ))
        .await
        .expect("Install call failed");

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::RuntimeFailure));
    assert!(outcome.error.is_some());
}
