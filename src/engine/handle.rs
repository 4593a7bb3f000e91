//! Completion handle for enqueued operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::EngineError;
use crate::operation::{Operation, OperationListener, OperationStatus};

// == Cancellation Token ==
/// Cooperative cancellation flag shared between a handle and its worker.
///
/// Workers look at it before starting an operation and once the transport
/// call returns. In-flight I/O is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// == Operation Handle ==
/// Returned by [`Engine::enqueue_operation`](crate::Engine::enqueue_operation).
///
/// The listener runs inside [`wait`](OperationHandle::wait), on the awaiting
/// task, so it never executes on a worker.
pub struct OperationHandle {
    pub(crate) receiver: oneshot::Receiver<Operation>,
    pub(crate) cancel: CancellationToken,
    pub(crate) listener: Box<dyn OperationListener>,
}

impl OperationHandle {
    /// Requests cancellation. The operation then reports `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the worker, delivers the outcome to the listener, then
    /// hands the finished operation back.
    pub async fn wait(self) -> Result<Operation, EngineError> {
        let OperationHandle {
            receiver,
            mut listener,
            ..
        } = self;

        let operation = receiver.await.map_err(|_| EngineError::WorkerLost)?;
        if operation.status() == OperationStatus::Completed {
            listener.on_completion(&operation);
        } else {
            listener.on_error(&operation);
        }
        Ok(operation)
    }
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
