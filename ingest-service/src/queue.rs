//! In-process job queue: submitted jobs are dispatched to a small pool of
//! worker tasks that drive the batch processor.

use crate::services::JobProcessor;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

/// Receiving half of the queue, shared by all workers.
pub type JobReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>;

/// Dispatch handle. Cloneable; dropping every clone closes the queue and
/// lets the workers drain and exit.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Uuid>,
}

impl JobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, Arc::new(Mutex::new(receiver)))
    }

    /// Enqueue a submitted job for processing.
    pub fn dispatch(&self, job_id: Uuid) -> Result<(), AppError> {
        self.sender
            .send(job_id)
            .map_err(|_| AppError::ServiceUnavailable)
    }
}

/// Spawn `worker_count` tasks competing for jobs on `receiver`.
///
/// A processing failure is logged and never tears the worker down; the
/// processor itself records the job's terminal state.
pub fn spawn_workers(
    receiver: JobReceiver,
    processor: Arc<JobProcessor>,
    worker_count: usize,
) -> Vec<JoinHandle<()>> {
    (0..worker_count.max(1))
        .map(|worker| {
            let receiver = receiver.clone();
            let processor = processor.clone();
            tokio::spawn(async move {
                info!(worker = worker, "Job worker started");
                loop {
                    // Hold the lock only across recv so a slow job on one
                    // worker never blocks dispatch to the others.
                    let job_id = { receiver.lock().await.recv().await };
                    match job_id {
                        Some(job_id) => {
                            if let Err(e) = processor.process(job_id).await {
                                error!(worker = worker, job_id = %job_id, error = %e, "Job processing error");
                            }
                        }
                        None => break,
                    }
                }
                info!(worker = worker, "Job worker stopped");
            })
        })
        .collect()
}
