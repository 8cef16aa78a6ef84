use polyrun::runner::FailureKind;

use super::{assert_no_residue, fixture_request, test_runner};

#[tokio::test]
async fn test_c_compile_error_reports_diagnostics() {
    let (runner, _staging) = test_runner();

    let outcome = runner
        .compile_and_run(fixture_request("c", "compile_error.c"))
        .await
        .expect("Compile and run call failed");

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::CompileError));
    assert!(outcome.run.is_none(), "should not run if compile fails");

    let error = outcome.error.expect("compile error text");
    // gcc points at the line with the missing semicolon
    assert!(error.contains("main.c:4"), "unexpected diagnostics: {error}");
    let staging = runner.store().root().display().to_string();
    assert!(!error.contains(&staging), "diagnostics leak the staging path: {error}");
    assert_no_residue(&runner).await;
}

#[tokio::test]
async fn test_compile_only_success() {
    let (runner, _staging) = test_runner();

    let outcome = runner
        .compile(fixture_request("cpp", "hello.cpp"))
        .await
        .expect("Compilation call failed");

    assert!(outcome.success);
    assert!(outcome.compile.as_ref().is_some_and(|c| c.is_success()));
    assert!(outcome.run.is_none());
    assert_no_residue(&runner).await;
}

#[tokio::test]
async fn test_compile_only_interpreted_language() {
    let (runner, _staging) = test_runner();

    let outcome = runner
        .compile(fixture_request("python", "hello.py"))
        .await
        .expect("Compilation call failed");

    assert!(outcome.success);
    assert!(outcome.compile.is_none());
    assert!(outcome.output.is_empty());
}
