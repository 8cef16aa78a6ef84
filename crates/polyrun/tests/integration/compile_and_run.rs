use super::{assert_no_residue, fixture_request, test_runner};

async fn assert_hello(language: &str, fixture: &str, expected: &str) {
    let (runner, _staging) = test_runner();

    let outcome = runner
        .compile_and_run(fixture_request(language, fixture))
        .await
        .expect("Compile and run failed");

    assert!(
        outcome.success,
        "{language} failed: {:?} {:?}",
        outcome.failure, outcome.error
    );
    assert_eq!(outcome.output, expected);
    assert!(outcome.error.is_none());
    assert_no_residue(&runner).await;
}

#[tokio::test]
async fn test_c_hello() {
    assert_hello("c", "hello.c", "42\n").await;
}

#[tokio::test]
async fn test_cpp_hello() {
    assert_hello("cpp", "hello.cpp", "Hello, World!\n").await;
}

#[tokio::test]
async fn test_python_hello() {
    assert_hello("python", "hello.py", "Hello, World!\n").await;
}

#[tokio::test]
async fn test_java_hello() {
    assert_hello("java", "Main.java", "Hello, World!\n").await;
}

#[tokio::test]
async fn test_java_upload_name_is_normalized() {
    // Uploaded as Solution.java, the public class Main still compiles
    assert_hello("java", "Solution.java", "renamed\n").await;
}

#[tokio::test]
async fn test_javascript_hello() {
    assert_hello("javascript", "hello.js", "Hello, World!\n").await;
}

#[tokio::test]
async fn test_typescript_hello() {
    assert_hello("typescript", "hello.ts", "Hello, World!\n").await;
}

#[tokio::test]
async fn test_go_hello() {
    assert_hello("go", "hello.go", "Hello, World!\n").await;
}

#[tokio::test]
async fn test_rust_hello() {
    assert_hello("rust", "hello.rs", "Hello, World!\n").await;
}

#[tokio::test]
async fn test_csharp_hello() {
    assert_hello("csharp", "hello.cs", "Hello, World!\n").await;
}

#[tokio::test]
async fn test_language_id_is_case_insensitive() {
    assert_hello("Python", "hello.py", "Hello, World!\n").await;
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    let (runner, _staging) = test_runner();

    let (a, b) = tokio::join!(
        runner.compile_and_run(fixture_request("c", "hello.c")),
        runner.compile_and_run(fixture_request("c", "hello.c")),
    );
    let (a, b) = (a.expect("first request"), b.expect("second request"));

    assert!(a.success && b.success);
    assert_ne!(a.id, b.id);
    assert_eq!(a.output, "42\n");
    assert_eq!(b.output, "42\n");
    assert_no_residue(&runner).await;
}
