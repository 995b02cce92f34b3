//! Render-thread task queue.
//!
//! Anything that happens off the render thread (a vsync tick, a sync token
//! resolving, the consumer acknowledging a flip) is turned into a [`RenderTask`]
//! and posted here. The surface drains the queue on the render thread, so
//! callbacks that touch GPU state only ever run there.
//!
//! Every [`TaskSender`] shares the queue's [`CancellationToken`]. Once the queue
//! is revoked (the surface is being torn down) posting becomes a no-op.

use crate::gpu::SyncToken;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RenderTask {
    /// Hardware vsync tick relayed from the vsync thread.
    VSync { timebase: Instant, interval: Duration },
    /// The GPU finished the work issued before a swap.
    SyncTokenSignaled { token: SyncToken },
    /// The external consumer is done with the flip for this swap.
    FlipAcked { token: SyncToken },
}

/// Posting side of the queue. Cheap to clone and safe to move to other threads.
#[derive(Clone, Debug)]
pub(crate) struct TaskSender {
    tx: mpsc::UnboundedSender<RenderTask>,
    cancel: CancellationToken,
}

impl TaskSender {
    /// Posts `task` unless the queue has been revoked or dropped. Returns whether it was queued.
    pub(crate) fn post(&self, task: RenderTask) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(task).is_ok()
    }

    pub(crate) fn is_revoked(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// FIFO queue owned by the render thread.
pub(crate) struct TaskQueue {
    tx: mpsc::UnboundedSender<RenderTask>,
    rx: mpsc::UnboundedReceiver<RenderTask>,
    cancel: CancellationToken,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn sender(&self) -> TaskSender {
        TaskSender {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Next queued task, without waiting.
    pub(crate) fn try_next(&mut self) -> Option<RenderTask> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Waits for the next task. Returns `None` once the queue is revoked.
    pub(crate) async fn next(&mut self) -> Option<RenderTask> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            task = self.rx.recv() => task,
        }
    }

    /// Stops delivery for good. Senders held elsewhere turn into no-ops.
    pub(crate) fn revoke(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }
}
