//! Fixed worker pool strategy
//!
//! Instead of one activation per task, `limit` workers pull tasks from a
//! shared queue in submission order. Activations still pass through the
//! admission gate, so events and accounting are identical to the
//! spawn-per-task strategy while only `limit` tokio tasks ever exist.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error};

use super::executor::{run_activation, ActivationContext};
use super::types::{Task, TaskResult, TaskStatus};

pub(crate) async fn run_worker_pool(
    ctx: &Arc<ActivationContext>,
    tasks: Vec<Task>,
    workers: usize,
) -> Vec<TaskResult> {
    let total = tasks.len();
    let queue = Arc::new(Mutex::new(
        tasks.into_iter().enumerate().collect::<VecDeque<_>>(),
    ));
    let slots: Arc<Mutex<Vec<Option<TaskResult>>>> = Arc::new(Mutex::new(vec![None; total]));

    let worker_count = workers.min(total);
    debug!(worker_count = worker_count, total_tasks = total, "Starting worker pool");

    let handles: Vec<_> = (0..worker_count)
        .map(|worker| {
            let ctx = Arc::clone(ctx);
            let queue = Arc::clone(&queue);
            let slots = Arc::clone(&slots);

            tokio::spawn(async move {
                let mut processed = 0usize;
                loop {
                    let next = queue.lock().pop_front();
                    let Some((index, task)) = next else {
                        break;
                    };
                    let result = run_activation(Arc::clone(&ctx), index, task).await;
                    slots.lock()[index] = Some(result);
                    processed += 1;
                }
                debug!(worker = worker, processed = processed, "Worker drained queue");
            })
        })
        .collect();

    for (worker, handle) in handles.into_iter().enumerate() {
        if let Err(e) = handle.await {
            error!(worker = worker, error = %e, "Worker join error");
        }
    }

    // Empty unless a worker died; drop whatever it left unclaimed.
    queue.lock().clear();

    let mut slots = slots.lock();
    std::mem::take(&mut *slots)
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| TaskResult {
                index,
                status: TaskStatus::Panicked,
                error: Some("worker exited before reporting this task".to_string()),
                duration: Duration::ZERO,
            })
        })
        .collect()
}
