#![cfg(unix)]

use std::time::Duration;

use crawldesk_core::execution::{
    CommandSpec, ProcessExitStatus, ProcessSpawnRequest, ProcessTerminationMode,
    TokioProcessExecutor, spawn_validated,
};
use crawldesk_core::models::{CoreErrorKind, TaskId};

fn shell(script: &str) -> CommandSpec {
    CommandSpec::new("/bin/sh").arg("-c").arg(script).arg("scraper")
}

#[tokio::test]
async fn terminating_kills_helpers_spawned_by_the_scraper() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("helper-survived");
    let request = ProcessSpawnRequest::new(
        shell(r#"(sleep 1; echo alive > "$1") & echo started; wait"#)
            .arg(marker.display().to_string()),
    )
    .task_id(TaskId::from("browser"));

    let handle = spawn_validated(&TokioProcessExecutor, request).expect("spawn should succeed");
    let terminator = handle.terminator();
    let waiter = tokio::spawn(handle.wait());
    tokio::time::sleep(Duration::from_millis(100)).await;

    terminator
        .terminate(ProcessTerminationMode::Immediate)
        .expect("terminate should succeed");
    let output = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter should finish after kill")
        .unwrap()
        .expect("wait should succeed");
    assert_eq!(output.status, ProcessExitStatus::Terminated);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!marker.exists(), "helper outlived the scraper's process group");
}

#[tokio::test]
async fn item_timeout_kills_a_hung_scraper() {
    let request = ProcessSpawnRequest::new(shell("sleep 30; echo RESULT:{}"))
        .task_id(TaskId::from("hung"))
        .timeout(Duration::from_millis(100));

    let handle = spawn_validated(&TokioProcessExecutor, request).expect("spawn should succeed");
    let error = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("timeout should fire well before the sleep ends")
        .expect_err("should time out");

    assert_eq!(error.kind, CoreErrorKind::Timeout);
    assert_eq!(error.task, Some(TaskId::from("hung")));
}

#[tokio::test]
async fn scraper_sees_its_task_id_and_reports_on_stdout() {
    let request = ProcessSpawnRequest::new(
        shell(r#"echo "RESULT:{\"task\":\"$CRAWLDESK_TASK_ID\"}""#).env("CRAWLDESK_TASK_ID", "7"),
    );

    let handle = spawn_validated(&TokioProcessExecutor, request).expect("spawn should succeed");
    let output = handle.wait().await.expect("wait should succeed");

    assert_eq!(output.status, ProcessExitStatus::ExitCode(0));
    assert_eq!(output.stdout_text().trim(), r#"RESULT:{"task":"7"}"#);
}

#[tokio::test]
async fn missing_scraper_binary_is_a_process_failure() {
    let request = ProcessSpawnRequest::new(CommandSpec::new("/nonexistent/scraper"))
        .task_id(TaskId::from("missing"));

    let Err(error) = spawn_validated(&TokioProcessExecutor, request) else {
        panic!("spawn should fail for a missing binary");
    };
    assert_eq!(error.kind, CoreErrorKind::ProcessFailure);
    assert_eq!(error.task, Some(TaskId::from("missing")));
}
