//! The external consumer side of a swap.
//!
//! Once the GPU has finished a frame, the surface sends a flip notification to
//! the consumer (a remote display, a video sink, another process). The
//! notification carries the buffer handle, which is empty when the consumer
//! should keep using the buffer it already has, and a [`FlipAck`] the consumer
//! must invoke once it has imported or consumed the buffer.

use crate::gfx::{BufferHandle, Rect};
use crate::gpu::SyncToken;
use crate::task::{RenderTask, TaskSender};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Continuation handed to the consumer with every flip. Sendable to any thread.
///
/// Dropping it without calling [`ack`](Self::ack) acknowledges the flip as well,
/// so a consumer that goes away never leaves a swap pending.
#[derive(Debug)]
pub struct FlipAck {
    token: SyncToken,
    sender: Option<TaskSender>,
}

impl FlipAck {
    pub(crate) fn new(token: SyncToken, sender: TaskSender) -> Self {
        Self {
            token,
            sender: Some(sender),
        }
    }

    /// The swap this acknowledgement belongs to.
    pub fn token(&self) -> SyncToken {
        self.token
    }

    /// Tells the surface the consumer is done with this flip. A no-op when the
    /// surface has been torn down in the meantime.
    pub fn ack(mut self) {
        self.post();
    }

    fn post(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        if !sender.post(RenderTask::FlipAcked { token: self.token }) {
            log::trace!("flip ack for {:?} arrived after teardown", self.token);
        }
    }
}

impl Drop for FlipAck {
    fn drop(&mut self) {
        if self.sender.is_some() {
            log::debug!("flip {:?} dropped without ack", self.token);
            self.post();
        }
    }
}

/// Flip-notification channel towards the external consumer.
pub trait ExternalRendererUpdater {
    /// Called on the render thread after the GPU finished writing the frame.
    /// `new_texture` is set when `handle` refers to a freshly allocated buffer.
    fn on_after_flip(&self, handle: BufferHandle, new_texture: bool, damage: Rect, done: FlipAck);
}

/// A flip as received by a consumer task on the other end of a [`ChannelRendererUpdater`].
#[derive(Debug)]
pub struct FlipNotification {
    pub handle: BufferHandle,
    pub new_texture: bool,
    pub damage: Rect,
    done: FlipAck,
}

impl FlipNotification {
    pub fn token(&self) -> SyncToken {
        self.done.token()
    }

    /// Acknowledges the flip; see [`FlipAck::ack`].
    pub fn ack(self) {
        self.done.ack();
    }
}

/// Delivers flips over a bounded tokio channel to a consumer task.
pub struct ChannelRendererUpdater {
    tx: mpsc::Sender<FlipNotification>,
}

impl ChannelRendererUpdater {
    /// Creates the updater and the receiving end for the consumer.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FlipNotification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl ExternalRendererUpdater for ChannelRendererUpdater {
    fn on_after_flip(&self, handle: BufferHandle, new_texture: bool, damage: Rect, done: FlipAck) {
        let notification = FlipNotification {
            handle,
            new_texture,
            damage,
            done,
        };

        // A consumer that cannot take the flip must not stall the swap pipeline.
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                log::warn!("flip consumer is lagging, dropping flip {:?}", n.token());
                n.ack();
            }
            Err(TrySendError::Closed(n)) => {
                log::warn!("flip consumer is gone, dropping flip {:?}", n.token());
                n.ack();
            }
        }
    }
}
