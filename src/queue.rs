//! Bounded admission queue.
//!
//! Sits between the ingress handlers and the dispatch workers and provides
//! the backpressure edge: `submit` never blocks — a full queue is an
//! immediate `queue_full` rejection, and the caller waits on the returned
//! completion handle under its own ceiling. Each admitted item is processed
//! exactly once by whichever drain worker receives it.

use crate::{InferRequest, RoutedResponse, RouterError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Default queue capacity.
pub const QUEUE_CAPACITY: usize = 1000;

/// How long an ingress handler waits for its work item to complete before
/// answering `queue_timeout`. The item keeps executing; its result is
/// abandoned.
pub const QUEUE_WAIT_CEILING: Duration = Duration::from_secs(5);

/// One admitted request plus the channel its final outcome travels back on.
pub struct WorkItem {
    pub request: InferRequest,
    pub request_id: String,
    /// Trace id minted at ingress; stamped onto the final response.
    pub trace_id: String,
    pub enqueued_at: Instant,
    done: oneshot::Sender<Result<RoutedResponse, RouterError>>,
}

impl WorkItem {
    /// Deliver the final outcome. Best-effort: the ingress side may have
    /// timed out and dropped its receiver, in which case the result is
    /// discarded.
    pub fn complete(self, outcome: Result<RoutedResponse, RouterError>) {
        if self.done.send(outcome).is_err() {
            debug!(request_id = %self.request_id, "work item abandoned by caller");
        }
    }
}

/// Receiver half shared by the drain worker pool.
pub type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>;

/// Sender half held by the ingress handlers.
#[derive(Clone)]
pub struct AdmissionQueue {
    tx: mpsc::Sender<WorkItem>,
}

impl AdmissionQueue {
    /// Bounded queue of `capacity` items.
    pub fn new(capacity: usize) -> (Self, SharedReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, Arc::new(tokio::sync::Mutex::new(rx)))
    }

    /// Admit a request without blocking.
    ///
    /// Returns the completion handle on success, `QueueFull` when the queue
    /// is at capacity.
    pub fn submit(
        &self,
        request: InferRequest,
        request_id: String,
        trace_id: String,
    ) -> Result<oneshot::Receiver<Result<RoutedResponse, RouterError>>, RouterError> {
        let (done_tx, done_rx) = oneshot::channel();
        let item = WorkItem {
            request,
            request_id,
            trace_id,
            enqueued_at: Instant::now(),
            done: done_tx,
        };

        match self.tx.try_send(item) {
            Ok(()) => {
                crate::metrics::queue_depth_add(1);
                Ok(done_rx)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(RouterError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(RouterError::Internal("admission queue closed".into()))
            }
        }
    }
}

/// Receive the next work item for a drain worker. `None` once all senders
/// are gone.
pub async fn next_item(rx: &SharedReceiver) -> Option<WorkItem> {
    let item = rx.lock().await.recv().await;
    if item.is_some() {
        crate::metrics::queue_depth_add(-1);
    }
    item
}
