//! Integration tests for the wired simulation.
//!
//! Tests verify:
//! 1. Pop events reach subscribers only after the popping call returned
//! 2. Worker completions flow into the disapproval monitor
//! 3. A generator-fed backlog drives disapproval to saturation
//! 4. A configured session plays to its end on virtual time

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_pending, assert_ready};

use crunch::domain::models::{Config, Issue, IssueStatus};
use crunch::services::disapproval_monitor::MAX_DISAPPROVAL;
use crunch::services::{
    BoundedQueue, Clock, ClockEvent, DisapprovalMonitor, IssueGenerator, QueueEvent, Session,
    Worker,
};

fn dev_issue(project: &str, priority: u8, complexity: u8) -> Issue {
    let mut issue = Issue::new(project, priority, complexity).unwrap();
    issue.set_status(IssueStatus::Dev);
    issue
}

#[tokio::test]
async fn test_pop_event_is_delivered_after_return() {
    let queue = BoundedQueue::backlog(3).unwrap();
    let issue = Issue::new("Test project", 1, 1).unwrap();
    let id = issue.id();
    queue.push(issue).unwrap();

    let mut waiting = tokio_test::task::spawn(queue.events().once(QueueEvent::is_popped));
    assert_pending!(waiting.poll());

    let popped = queue.pop_by_id(id).unwrap();
    assert_eq!(popped.id(), id);
    assert!(waiting.is_woken());

    let envelope = assert_ready!(waiting.poll()).unwrap();
    match envelope.payload {
        QueueEvent::Popped(snapshot) => assert_eq!(snapshot.id, id),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_worker_completions_relieve_disapproval() {
    let backlog = BoundedQueue::backlog(5).unwrap();
    for _ in 0..5 {
        backlog.push(Issue::new("Test project", 1, 1).unwrap()).unwrap();
    }

    let worker = Worker::new(5, 5.0).unwrap();
    let monitor = DisapprovalMonitor::new(Arc::new(backlog.clone()), worker.events()).unwrap();
    let monitor_task = monitor.start().unwrap();
    let worker_task = worker.start().unwrap();

    // Full backlog: first sample adds the maximum.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!((monitor.disapproval() - 8.0).abs() < f64::EPSILON);

    worker.queue().push(dev_issue("Apple", 1, 2)).unwrap();
    worker.queue().push(dev_issue("Apple", 2, 2)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Both finished in the first term: 4 points after the issue penalty.
    assert_eq!(worker.completed_count(), 2);
    assert!((monitor.disapproval() - 4.0).abs() < f64::EPSILON);

    monitor.stop();
    worker.stop();
    monitor_task.await.unwrap();
    worker_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unattended_backlog_saturates_disapproval() {
    let backlog = BoundedQueue::backlog(5).unwrap();
    let worker = Worker::new(5, 4.0).unwrap();
    let generator = IssueGenerator::with_seed(
        backlog.clone(),
        vec!["Lenono".to_string(), "Apple".to_string()],
        0.5,
        Some(17),
    )
    .unwrap();
    let monitor = DisapprovalMonitor::new(Arc::new(backlog.clone()), worker.events()).unwrap();

    let mut updates = monitor.events().subscribe();
    let tasks = [generator.start().unwrap(), monitor.start().unwrap()];

    let mut last = 0.0;
    while let Some(envelope) = updates.recv().await {
        let value = envelope.payload.disapproval();
        assert!(value >= last, "no completions, so disapproval only rises");
        last = value;
        if value >= MAX_DISAPPROVAL {
            break;
        }
    }

    assert!(monitor.is_saturated());
    assert_eq!(backlog.size(), 5);
    assert_eq!(generator.generated_count(), 5);

    generator.stop();
    monitor.stop();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_clock_measures_a_session() {
    let clock = Clock::new(Duration::from_millis(250)).unwrap();
    let stopped = clock.events().once(|event| matches!(event, ClockEvent::Stopped { .. }));
    let task = clock.start();

    tokio::time::sleep(Duration::from_secs(61)).await;
    clock.stop();
    task.await.unwrap();

    let envelope = stopped.await.unwrap();
    assert_eq!(envelope.payload, ClockEvent::Stopped { elapsed_ms: 61_000 });
    assert_eq!(crunch::services::format_elapsed(clock.spent_time()), "01:01");
}

#[tokio::test(start_paused = true)]
async fn test_session_plays_to_the_end() {
    let mut config = Config::default();
    config.generator.seed = Some(2024);
    config.generator.rate = 0.5;
    config.backlog.capacity = 6;

    let session = Session::new(&config).unwrap();
    session.start();

    let summary = tokio::time::timeout(Duration::from_secs(3600), session.wait_for_end())
        .await
        .expect("disapproval should saturate");

    assert!((summary.final_disapproval - MAX_DISAPPROVAL).abs() < f64::EPSILON);
    assert!(summary.issues_generated >= summary.issues_completed);
    assert_eq!(
        summary.issues_generated as usize,
        summary.issues_completed as usize + summary.backlog_size + summary.active_size
    );
    assert!(summary.elapsed_ms > 0);
    assert!(session.is_ended());
    assert!(session.worker().is_stopped());
}
