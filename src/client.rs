//! Compositor-facing callbacks.

use crate::gfx::{LatencyInfo, PresentationFeedback, Size, SwapTimings};
use tokio::sync::broadcast;

/// Bookkeeping callbacks of the compositor that drives the surface. Called on the render thread.
pub trait OutputSurfaceClient {
    fn did_receive_swap_buffers_ack(&mut self, timings: SwapTimings);

    fn did_receive_presentation_feedback(&mut self, feedback: PresentationFeedback);

    /// Only called when per-swap size notifications are enabled.
    fn did_swap_with_size(&mut self, size: Size);
}

/// Receives latency info of completed swaps.
pub trait LatencyTracker {
    fn on_gpu_swap_buffers_completed(&mut self, latency_info: &[LatencyInfo]);
}

/// Latency tracker that writes to the log.
#[derive(Debug, Default)]
pub struct LogLatencyTracker {
    completed: u64,
}

impl LogLatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of swaps reported so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }
}

impl LatencyTracker for LogLatencyTracker {
    fn on_gpu_swap_buffers_completed(&mut self, latency_info: &[LatencyInfo]) {
        self.completed += 1;
        for info in latency_info {
            log::trace!(
                "swap completed: trace {} after {:?}",
                info.trace_id,
                info.created.elapsed()
            );
        }
    }
}

/// Events published by a [`BroadcastClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    SwapAck(SwapTimings),
    PresentationFeedback(PresentationFeedback),
    SwapWithSize(Size),
}

/// Client that publishes every callback on a broadcast channel, so any number
/// of listeners can follow the surface.
pub struct BroadcastClient {
    tx: broadcast::Sender<SurfaceEvent>,
}

impl BroadcastClient {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<SurfaceEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: SurfaceEvent) {
        // send() fails only when there are no receivers, which is fine.
        let _ = self.tx.send(event);
    }
}

impl OutputSurfaceClient for BroadcastClient {
    fn did_receive_swap_buffers_ack(&mut self, timings: SwapTimings) {
        self.publish(SurfaceEvent::SwapAck(timings));
    }

    fn did_receive_presentation_feedback(&mut self, feedback: PresentationFeedback) {
        self.publish(SurfaceEvent::PresentationFeedback(feedback));
    }

    fn did_swap_with_size(&mut self, size: Size) {
        self.publish(SurfaceEvent::SwapWithSize(size));
    }
}
