use polyrun::runner::SubmissionRequest;
use polyrun::types::{LimitExceeded, ResourceLimits};

use super::{fixture_request, test_runner};

#[tokio::test]
async fn test_custom_limits() {
    let (runner, _staging) = test_runner();

    let limits = ResourceLimits::unset()
        .with_time_limit(10.0)
        .with_wall_time_limit(30.0)
        .with_memory_limit(512 * 1024);

    let outcome = runner
        .run_source(fixture_request("c", "hello.c"), Some(&limits))
        .await
        .expect("Execution failed");

    assert!(outcome.success);
    let run = outcome.run.expect("run result");
    // Time should be under our generous limit
    assert!(run.wall_time.as_secs_f64() < 30.0);
}

#[tokio::test]
async fn test_output_is_truncated_at_limit() {
    let (runner, _staging) = test_runner();
    let source = "print('x' * 100000)\n";
    let limits = ResourceLimits::unset().with_max_output(1024);

    let outcome = runner
        .run_source(SubmissionRequest::new("python", source), Some(&limits))
        .await
        .expect("Execution failed");

    assert!(outcome.truncated);
    assert_eq!(outcome.output.len(), 1024);
    let run = outcome.run.expect("run result");
    assert_eq!(run.limit_exceeded, LimitExceeded::Output);
}

#[tokio::test]
async fn test_memory_limit_stops_allocation() {
    let (runner, _staging) = test_runner();
    let source = "data = bytearray(1024 * 1024 * 1024)\nprint(len(data))\n";
    let limits = ResourceLimits::unset().with_memory_limit(128 * 1024);

    let outcome = runner
        .run_source(SubmissionRequest::new("python", source), Some(&limits))
        .await
        .expect("Execution failed");

    assert!(!outcome.success);
    assert!(outcome.error.is_some_and(|e| e.contains("MemoryError")));
}

#[tokio::test]
async fn test_node_allocation_is_bounded_by_default() {
    let (runner, _staging) = test_runner();
    let source = "const big = Buffer.alloc(1500 * 1024 * 1024, 1);\nconsole.log(big.length);\n";

    let outcome = runner
        .compile_and_run(SubmissionRequest::new("javascript", source))
        .await
        .expect("Execution failed");

    assert!(!outcome.success);
    assert!(!outcome.output.contains("1572864000"));
}

#[tokio::test]
async fn test_go_allocation_is_bounded_by_default() {
    let (runner, _staging) = test_runner();
    let source = r#"package main

import "fmt"

func main() {
	big := make([]byte, 1500<<20)
	for i := range big {
		big[i] = 1
	}
	fmt.Println(len(big))
}
"#;

    let outcome = runner
        .compile_and_run(SubmissionRequest::new("go", source))
        .await
        .expect("Execution failed");

    assert!(!outcome.success);
}
