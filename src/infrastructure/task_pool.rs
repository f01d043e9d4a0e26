//! Bounded task pools with caller-runs back-pressure
//!
//! Each task kind (health, activity, recovery, fence) gets its own pool so a
//! backlog of slow fence operations cannot starve health polling. A pool is
//! a bounded queue drained by a fixed set of workers; when the queue is
//! full, `submit` runs the task inline on the caller instead of dropping it.
//!
//! Tasks are single-shot futures. Time bounds are the submitter's job
//! (wrap the work in `tokio::time::timeout` before submitting); the pool
//! itself only provides concurrency limits and back-pressure.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// A queued unit of work. Boxed at the call site: type erasure here is what
/// lets task bodies call back into the code that submitted them without
/// creating recursive future types.
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Sizing for one pool: worker count and queue depth.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct TaskPoolConfig {
    pub workers: usize,
    pub queue_size: usize,
}

impl Default for TaskPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 64,
        }
    }
}

/// Completion flag for an outstanding task.
///
/// Stored in the per-resource counter to act as a mutex for a task class:
/// while a ticket is unfinished, no second task of the same class is
/// dispatched for that resource. The submitter must finish the ticket when
/// the task completes or times out.
#[derive(Debug, Clone, Default)]
pub struct TaskTicket {
    done: Arc<AtomicBool>,
}

impl TaskTicket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn finish(&self) {
        self.done.store(true, Ordering::Release);
    }
}

/// Fixed-size worker pool over a bounded queue.
#[derive(Clone)]
pub struct TaskPool {
    name: &'static str,
    tx: mpsc::Sender<BoxedTask>,
}

impl TaskPool {
    /// Spawn `config.workers` workers draining a queue of `config.queue_size`.
    pub fn new(name: &'static str, config: TaskPoolConfig) -> Self {
        let workers = config.workers.max(1);
        let queue_size = config.queue_size.max(1);
        let (tx, rx) = mpsc::channel::<BoxedTask>(queue_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker in 0..workers {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    // Hold the receiver lock only while dequeuing, never
                    // while running a task.
                    let task = { rx.lock().await.recv().await };
                    match task {
                        Some(task) => task.await,
                        None => {
                            tracing::debug!(pool = name, worker, "task pool worker shutting down");
                            break;
                        }
                    }
                }
            });
        }

        Self { name, tx }
    }

    /// Submit a task. If the queue is full the task runs inline on the
    /// caller (back-pressure); it is never silently dropped.
    pub async fn submit(&self, task: BoxedTask) {
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(task)) => {
                tracing::debug!(pool = self.name, "queue full, running task on caller");
                task.await;
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                // Pool shut down mid-flight; run inline rather than drop.
                tracing::warn!(pool = self.name, "pool closed, running task on caller");
                task.await;
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
