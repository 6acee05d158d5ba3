//! Batch Execution Tests
//!
//! Tests for running many tasks under a concurrency limit with start/finish
//! events, live worker accounting, and both execution strategies

use batchgate::{
    BatchRunner, EventSink, ExecutionStrategy, LiveWorkerCounter, Task, TaskEvent, TaskStatus,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Start,
    Finish(TaskStatus),
}

/// Sink that keeps every event in arrival order
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(Kind, TaskEvent)>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<(Kind, TaskEvent)> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_start(&self, event: &TaskEvent) {
        self.events.lock().push((Kind::Start, *event));
    }

    fn on_finish(&self, event: &TaskEvent, status: TaskStatus) {
        self.events.lock().push((Kind::Finish(status), *event));
    }
}

/// Task that tracks how many tasks are inside their body at once
fn tracked_task(executing: Arc<AtomicUsize>, max_seen: Arc<AtomicUsize>, work: Duration) -> Task {
    Task::new(move || async move {
        let now = executing.fetch_add(1, Ordering::SeqCst) + 1;
        max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(work).await;
        executing.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    })
}

fn assert_paired_events(events: &[(Kind, TaskEvent)], total: usize, limit: usize) {
    for index in 0..total {
        let positions: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, (_, e))| e.index == index)
            .collect();
        assert_eq!(positions.len(), 2, "task {} should have one start and one finish", index);

        let (start_pos, (start_kind, start)) = positions[0];
        let (finish_pos, (finish_kind, finish)) = positions[1];
        assert_eq!(*start_kind, Kind::Start, "task {} should start first", index);
        assert!(matches!(finish_kind, Kind::Finish(_)));
        assert!(start_pos < finish_pos);

        assert_eq!(start.total, total);
        assert!((1..=limit).contains(&start.active_workers));
        assert!(finish.active_workers < limit);
    }
}

#[tokio::test]
async fn test_five_noop_tasks_with_limit_two() {
    let sink = Arc::new(RecordingSink::default());
    let runner = BatchRunner::new(2)
        .expect("limit is valid")
        .with_event_sink(sink.clone());

    let tasks = (0..5).map(|_| Task::noop()).collect();
    let report = runner.run_collect(tasks).await.expect("batch should run");

    assert_eq!(report.total(), 5);
    assert_eq!(report.completed(), 5);
    assert!(report.peak_active_workers <= 2);

    let events = sink.events();
    assert_eq!(events.len(), 10);
    assert_paired_events(&events, 5, 2);
}

#[tokio::test]
async fn test_empty_batch_emits_nothing() {
    let sink = Arc::new(RecordingSink::default());
    let runner = BatchRunner::new(3)
        .expect("limit is valid")
        .with_event_sink(sink.clone());

    let report = runner.run_collect(Vec::new()).await.expect("empty batch should run");

    assert_eq!(report.total(), 0);
    assert!(report.is_success());
    assert!(sink.events().is_empty());
    runner.run(Vec::new()).await.expect("silent mode should accept an empty batch");
}

#[tokio::test]
async fn test_results_are_ordered_by_index() {
    let runner = BatchRunner::new(3).expect("limit is valid");

    // Later tasks finish first.
    let tasks = (0..6u64)
        .map(|i| {
            Task::new(move || async move {
                tokio::time::sleep(Duration::from_millis(30 - i * 5)).await;
                Ok(())
            })
        })
        .collect();

    let report = runner.run_collect(tasks).await.expect("batch should run");
    let indices: Vec<_> = report.results.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_limit_is_never_exceeded() {
    let executing = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(RecordingSink::default());

    let runner = BatchRunner::new(3)
        .expect("limit is valid")
        .with_event_sink(sink.clone());

    let tasks = (0..40)
        .map(|_| tracked_task(executing.clone(), max_seen.clone(), Duration::from_millis(5)))
        .collect();
    let report = runner.run_collect(tasks).await.expect("batch should run");

    assert_eq!(report.completed(), 40);
    assert!(max_seen.load(Ordering::SeqCst) <= 3);
    assert!(report.peak_active_workers <= 3);
    assert_eq!(executing.load(Ordering::SeqCst), 0);
    assert_paired_events(&sink.events(), 40, 3);
}

#[tokio::test(start_paused = true)]
async fn test_admission_throttles_wall_clock() {
    let runner = BatchRunner::new(10).expect("limit is valid");
    let tasks = (0..100)
        .map(|_| {
            Task::new(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(())
            })
        })
        .collect();

    let start = tokio::time::Instant::now();
    let report = runner.run_collect(tasks).await.expect("batch should run");
    let elapsed = start.elapsed();

    // ceil(100 / 10) waves of 10ms each.
    assert_eq!(report.completed(), 100);
    assert!(elapsed >= Duration::from_millis(100), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(150), "elapsed {:?}", elapsed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_throttles_real_time() {
    let runner = BatchRunner::new(10).expect("limit is valid");
    let tasks = (0..100)
        .map(|_| {
            Task::new(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(())
            })
        })
        .collect();

    let start = std::time::Instant::now();
    runner.run(tasks).await.expect("batch should run");
    let elapsed = start.elapsed();

    // Unbounded launch would take ~10ms, sequential ~1s.
    assert!(elapsed >= Duration::from_millis(100), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(900), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_counter_returns_to_baseline() {
    let counter = LiveWorkerCounter::new();
    // Held by someone outside the batch for the whole test.
    counter.increment();
    let runner = BatchRunner::new(4)
        .expect("limit is valid")
        .with_counter(counter.clone());

    for _ in 0..3 {
        let tasks = (0..12).map(|_| Task::noop()).collect();
        runner.run(tasks).await.expect("batch should run");
        assert_eq!(counter.get(), 1);
    }

    counter.decrement();
    assert_eq!(counter.get(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_keep_separate_counters() {
    let first_sink = Arc::new(RecordingSink::default());
    let second_sink = Arc::new(RecordingSink::default());
    let first = BatchRunner::new(2)
        .expect("limit is valid")
        .with_event_sink(first_sink.clone());
    let second = BatchRunner::new(2)
        .expect("limit is valid")
        .with_event_sink(second_sink.clone());

    let work = || {
        (0..10)
            .map(|_| {
                Task::new(|| async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(())
                })
            })
            .collect::<Vec<_>>()
    };

    let (a, b) = tokio::join!(first.run_collect(work()), second.run_collect(work()));
    assert_eq!(a.expect("first batch").completed(), 10);
    assert_eq!(b.expect("second batch").completed(), 10);

    // Each batch only sees its own workers.
    assert_paired_events(&first_sink.events(), 10, 2);
    assert_paired_events(&second_sink.events(), 10, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_strategy_matches_contract() {
    let executing = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(RecordingSink::default());

    let runner = BatchRunner::new(4)
        .expect("limit is valid")
        .with_strategy(ExecutionStrategy::WorkerPool)
        .with_event_sink(sink.clone());

    let tasks = (0..25)
        .map(|_| tracked_task(executing.clone(), max_seen.clone(), Duration::from_millis(2)))
        .collect();
    let report = runner.run_collect(tasks).await.expect("batch should run");

    assert_eq!(report.completed(), 25);
    assert!(max_seen.load(Ordering::SeqCst) <= 4);
    assert_eq!(
        report.results.iter().map(|r| r.index).collect::<Vec<_>>(),
        (0..25).collect::<Vec<_>>()
    );
    assert_paired_events(&sink.events(), 25, 4);
}

#[tokio::test]
async fn test_worker_pool_with_fewer_tasks_than_workers() {
    let runner = BatchRunner::new(8)
        .expect("limit is valid")
        .with_strategy(ExecutionStrategy::WorkerPool);

    let report = runner
        .run_collect(vec![Task::noop(), Task::noop()])
        .await
        .expect("batch should run");
    assert_eq!(report.completed(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_tasks_run_on_blocking_pool() {
    let done = Arc::new(AtomicUsize::new(0));
    let runner = BatchRunner::new(2).expect("limit is valid");

    let tasks = (0..6)
        .map(|_| {
            let done = done.clone();
            Task::blocking(move || {
                std::thread::sleep(Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let report = runner.run_collect(tasks).await.expect("batch should run");
    assert_eq!(report.completed(), 6);
    assert_eq!(done.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_runner_is_reusable_across_batches() {
    let runner = BatchRunner::new(2).expect("limit is valid");
    let first = runner
        .run_collect((0..3).map(|_| Task::noop()).collect())
        .await
        .expect("first batch");
    let second = runner
        .run_collect((0..4).map(|_| Task::noop()).collect())
        .await
        .expect("second batch");

    assert_eq!(first.total(), 3);
    assert_eq!(second.total(), 4);
    assert_ne!(first.batch_id, second.batch_id);
}
