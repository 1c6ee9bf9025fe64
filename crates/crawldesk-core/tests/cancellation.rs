mod support;

use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};

use crawldesk_core::models::{CoreErrorKind, NewTask, TaskId, TaskStatus};
use support::{Harness, Probe, ScriptedFactory, Step, probe, quiet_config};

fn slow_harness() -> Harness {
    Harness::build(ScriptedFactory::slow(Duration::from_millis(100)), quiet_config())
}

#[tokio::test]
async fn cancelling_running_task_closes_session_and_keeps_it_cancelled() {
    let harness = Harness::new();
    let id = harness
        .engine
        .add_task(harness.task(
            "4",
            vec![probe("a", Step::Ok), probe("b", Step::Hang), probe("c", Step::Ok)],
        ))
        .unwrap()
        .id;

    let engine = harness.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run(&run_id).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.engine.cancel_task(&id).await);

    let session = harness.factory.session("4").unwrap();
    assert!(session.is_closed());

    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run should end within the grace period")
        .unwrap()
        .unwrap();

    let task = harness.engine.get_task(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(!harness.engine.debug_info().unwrap().tasks[0].has_session);
    assert!(
        !harness
            .factory
            .log
            .events()
            .contains(&"start:4:c".to_string())
    );
    assert!(harness.revealer.revealed().is_empty());
}

#[tokio::test]
async fn cancel_twice_is_a_noop_the_second_time() {
    let harness = Harness::new();
    let id = harness
        .engine
        .add_task(harness.task("twice", vec![probe("a", Step::Hang)]))
        .unwrap()
        .id;

    let engine = harness.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run(&run_id).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(harness.engine.cancel_task(&id).await);
    let notifications = harness.observer.count();
    assert!(harness.engine.cancel_task(&id).await);
    assert_eq!(harness.observer.count(), notifications);

    run.await.unwrap().unwrap();
    assert_eq!(
        harness.engine.get_task(&id).unwrap().unwrap().status,
        TaskStatus::Cancelled
    );
    let session = harness.factory.session("twice").unwrap();
    assert!(session.close_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn cancelling_idle_task_removes_it() {
    let harness = Harness::new();
    let id = harness.engine.add_task(NewTask::<Probe>::new("idle")).unwrap().id;

    assert!(harness.engine.cancel_task(&id).await);
    assert!(harness.engine.get_task(&id).unwrap().is_none());
    assert!(!harness.engine.cancel_task(&id).await);
}

#[tokio::test]
async fn cancelling_unknown_task_returns_false() {
    let harness = Harness::new();
    assert!(!harness.engine.cancel_task(&TaskId::from("ghost")).await);
    assert_eq!(harness.observer.count(), 0);
}

#[tokio::test]
async fn cancelling_finished_task_removes_it() {
    let harness = Harness::new();
    let id = harness
        .engine
        .add_task(harness.task("done", vec![probe("a", Step::Ok)]))
        .unwrap()
        .id;
    harness.engine.run(&id).await.unwrap();

    assert!(harness.engine.cancel_task(&id).await);
    assert!(harness.engine.get_all_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_task_can_be_run_again() {
    let harness = Harness::new();
    let id = harness
        .engine
        .add_task(harness.task("again", vec![probe("a", Step::Hang)]))
        .unwrap()
        .id;

    let engine = harness.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run(&run_id).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.engine.cancel_task(&id).await;
    run.await.unwrap().unwrap();

    harness
        .engine
        .update_task(
            &id,
            crawldesk_core::TaskPatch::new().items(Some(vec![probe("a", Step::Ok)])),
        )
        .unwrap();
    harness.engine.run(&id).await.unwrap();

    assert_eq!(
        harness.engine.get_task(&id).unwrap().unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn removing_running_task_closes_its_session() {
    let harness = Harness::new();
    let id = harness
        .engine
        .add_task(harness.task("gone", vec![probe("a", Step::Hang), probe("b", Step::Ok)]))
        .unwrap()
        .id;

    let engine = harness.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run(&run_id).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(harness.engine.remove_task(&id).await.unwrap());
    run.await.unwrap().unwrap();

    assert!(harness.factory.session("gone").unwrap().is_closed());
    assert!(harness.engine.get_task(&id).unwrap().is_none());
    assert!(
        !harness
            .factory
            .log
            .events()
            .contains(&"start:gone:b".to_string())
    );
}

#[tokio::test]
async fn cancel_all_during_mixed_states() {
    let harness = Harness::new();
    let running = harness
        .engine
        .add_task(harness.task("run", vec![probe("a", Step::Hang)]))
        .unwrap()
        .id;
    let scheduled = harness
        .engine
        .add_task(
            harness
                .task("later", vec![probe("a", Step::Ok)])
                .scheduled_at(std::time::SystemTime::now() + Duration::from_secs(3_600)),
        )
        .unwrap()
        .id;
    let idle = harness.engine.add_task(NewTask::<Probe>::new("idle")).unwrap().id;

    harness.engine.schedule(&scheduled).unwrap();
    let engine = harness.engine.clone();
    let run_id = running.clone();
    let run = tokio::spawn(async move { engine.run(&run_id).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    for id in [&running, &scheduled, &idle] {
        assert!(harness.engine.cancel_task(id).await);
    }
    run.await.unwrap().unwrap();

    let remaining = harness.engine.get_all_tasks().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, running);
    assert_eq!(remaining[0].status, TaskStatus::Cancelled);
    assert_eq!(harness.engine.debug_info().unwrap().total_scheduled, 0);
}

#[tokio::test]
async fn schedule_and_cancel_during_slow_launch_close_the_late_session() {
    let harness = slow_harness();
    let id = harness
        .engine
        .add_task(
            harness
                .task("r", vec![probe("a", Step::Hang)])
                .scheduled_at(SystemTime::now() + Duration::from_secs(3_600)),
        )
        .unwrap()
        .id;

    let engine = harness.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run(&run_id).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let error = harness.engine.schedule(&id).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidState);
    assert!(!harness.engine.has_pending_timer(&id));
    let starting = harness.engine.debug_info().unwrap();
    assert!(starting.tasks[0].launching);
    assert_eq!(starting.tasks[0].status, TaskStatus::Pending);

    assert!(harness.engine.cancel_task(&id).await);
    assert_eq!(
        harness.engine.get_task(&id).unwrap().unwrap().status,
        TaskStatus::Cancelled
    );

    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run should end once the late session is discarded")
        .unwrap()
        .unwrap();

    let session = harness.factory.session("r").unwrap();
    assert!(session.is_closed());
    assert!(harness.factory.log.events().is_empty());

    let after = harness.engine.debug_info().unwrap();
    assert_eq!(after.tasks[0].status, TaskStatus::Cancelled);
    assert!(!after.tasks[0].has_session);
    assert!(!after.tasks[0].launching);
    assert_eq!(after.total_scheduled, 0);

    assert!(harness.engine.cancel_task(&id).await);
    assert!(harness.engine.get_task(&id).unwrap().is_some());
    assert!(harness.revealer.revealed().is_empty());
}

#[tokio::test]
async fn removing_task_during_slow_launch_closes_the_late_session() {
    let harness = slow_harness();
    let id = harness
        .engine
        .add_task(harness.task("late", vec![probe("a", Step::Ok)]))
        .unwrap()
        .id;

    let engine = harness.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run(&run_id).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(harness.engine.remove_task(&id).await.unwrap());
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run should end once the late session is discarded")
        .unwrap()
        .unwrap();

    assert!(harness.factory.session("late").unwrap().is_closed());
    assert!(harness.engine.get_task(&id).unwrap().is_none());
    assert!(harness.factory.log.events().is_empty());
}
