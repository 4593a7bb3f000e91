//! Worker Pool
//!
//! Fixed set of background tasks serving enqueued operations. The pool size
//! bounds how many transport calls run concurrently.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{EngineShared, Job};

/// Spawns `workers` tasks draining the engine's job queue.
///
/// Each task loops until the sending side of the queue is dropped, which
/// happens when the engine is dropped or shut down. A job's cache lookup runs
/// here, off the caller. Finished operations are sent back through the job's
/// reply channel; listeners run on the side awaiting that channel, never here.
///
/// # Arguments
/// * `shared` - engine state used to run each operation
/// * `receiver` - the job queue, shared by all workers
/// * `workers` - number of tasks to spawn
///
/// # Returns
/// One JoinHandle per worker, awaited on shutdown.
pub(crate) fn spawn_worker_pool(
    shared: Arc<EngineShared>,
    receiver: mpsc::UnboundedReceiver<Job>,
    workers: usize,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));

    (0..workers)
        .map(|id| {
            let shared = shared.clone();
            let receiver = receiver.clone();

            tokio::spawn(async move {
                debug!(worker = id, "Worker started");

                loop {
                    // Hold the lock only while waiting for the next job
                    let job = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(Job {
                        mut operation,
                        force_reload,
                        cancel,
                        reply,
                    }) = job
                    else {
                        break;
                    };

                    shared.execute(&mut operation, force_reload, Some(&cancel)).await;
                    debug!(
                        worker = id,
                        url = operation.url(),
                        status = %operation.status(),
                        "Operation finished"
                    );

                    if reply.send(operation).is_err() {
                        debug!(worker = id, "Operation handle dropped before completion");
                    }
                }

                info!(worker = id, "Worker stopped");
            })
        })
        .collect()
}
