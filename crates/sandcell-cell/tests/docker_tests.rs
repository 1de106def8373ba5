//! Runs against a real Docker daemon with the executor image built.
//!
//! `cargo test -p sandcell-cell --test docker_tests -- --ignored`

use sandcell_cell::{CellConfig, IsolatedExecutionCell, TIMEOUT_EXIT_STATUS};
use sandcell_test_utils::{csv_input, program, CSV_SUM_PROGRAM, INFINITE_LOOP_PROGRAM};
use sandcell_types::SandboxRoots;
use std::time::Duration;

async fn docker_cell(timeout: Duration) -> IsolatedExecutionCell {
    let config = CellConfig::default().with_timeout(timeout);
    IsolatedExecutionCell::docker(config, SandboxRoots::default())
        .await
        .expect("docker daemon and executor image are available")
}

#[tokio::test]
#[ignore = "requires a Docker daemon and the executor image"]
async fn test_csv_sum_in_real_container() {
    let cell = docker_cell(Duration::from_secs(30)).await;

    let outcome = cell.run(&program(CSV_SUM_PROGRAM), &[csv_input()]).await.unwrap();

    assert!(outcome.succeeded, "stderr: {}", outcome.standard_error);
    assert_eq!(outcome.standard_output.trim(), "6");
    assert_eq!(outcome.output_artifacts["result.csv"], b"total\n6\n");
    assert!(cell.live_cells().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a Docker daemon and the executor image"]
async fn test_network_is_denied() {
    let cell = docker_cell(Duration::from_secs(30)).await;
    let code = "\
import socket
try:
    socket.create_connection(('1.1.1.1', 53), timeout=2)
    print('connected')
except OSError:
    print('denied')
";

    let outcome = cell.run(&program(code), &[]).await.unwrap();

    assert_eq!(outcome.standard_output.trim(), "denied");
}

#[tokio::test]
#[ignore = "requires a Docker daemon and the executor image"]
async fn test_real_timeout_terminates_program() {
    let cell = docker_cell(Duration::from_secs(3)).await;

    let outcome = cell.run(&program(INFINITE_LOOP_PROGRAM), &[]).await.unwrap();

    assert!(outcome.timed_out());
    assert_eq!(outcome.exit_status, TIMEOUT_EXIT_STATUS);
    assert!(cell.live_cells().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a Docker daemon and the executor image"]
async fn test_files_do_not_survive_between_runs() {
    let cell = docker_cell(Duration::from_secs(30)).await;
    let code = "\
import os
path = '/tmp/output/marker'
print('leaked' if os.path.exists(path) else 'fresh')
open(path, 'w').write('x')
";

    let first = cell.run(&program(code), &[]).await.unwrap();
    let second = cell.run(&program(code), &[]).await.unwrap();

    assert_eq!(first.standard_output.trim(), "fresh");
    assert_eq!(second.standard_output.trim(), "fresh");
}

#[tokio::test]
#[ignore = "requires a Docker daemon and the executor image"]
async fn test_program_larger_than_an_argument_runs() {
    let cell = docker_cell(Duration::from_secs(30)).await;
    let code = format!("{}print('ok')\n", "total = 0\n".repeat(18_000));

    let outcome = cell.run(&program(&code), &[]).await.unwrap();

    assert!(outcome.succeeded, "stderr: {}", outcome.standard_error);
    assert_eq!(outcome.standard_output.trim(), "ok");
}

#[tokio::test]
#[ignore = "requires a Docker daemon and the executor image"]
async fn test_teardown_does_not_wait_for_stop_grace() {
    let cell = docker_cell(Duration::from_secs(30)).await;

    let outcome = cell.run(&program("print(1)"), &[]).await.unwrap();

    assert!(outcome.succeeded);
    assert!(outcome.elapsed < cell.config().stop_grace(), "took {:?}", outcome.elapsed);
}

#[tokio::test]
#[ignore = "requires a Docker daemon and the executor image"]
async fn test_chatty_program_output_is_capped() {
    let config = CellConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_max_output_bytes(64 * 1024);
    let cell = IsolatedExecutionCell::docker(config, SandboxRoots::default())
        .await
        .expect("docker daemon and executor image are available");

    let outcome = cell.run(&program("while True:\n    print('x' * 100000)\n"), &[]).await.unwrap();

    assert!(outcome.timed_out());
    assert!(outcome.standard_output.len() <= 64 * 1024);
}
