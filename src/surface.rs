//! Off-screen output surface.
//!
//! [`OffscreenSurface`] lets a compositor render into a GPU memory buffer
//! instead of a window, and hands that buffer to an external consumer once the
//! GPU has finished writing it. The compositor drives it with the usual
//! sequence:
//!
//! 1. [`reshape`](OffscreenSurface::reshape) whenever size or color space may have changed,
//! 2. [`bind_framebuffer`](OffscreenSurface::bind_framebuffer) before issuing draw commands,
//! 3. [`swap_buffers`](OffscreenSurface::swap_buffers) once the frame is complete.
//!
//! A swap does not block. It registers a continuation with the GPU context
//! that fires once the frame's sync token resolves. That continuation, vsync
//! ticks and consumer acknowledgements all arrive through the render-thread
//! task queue, which the owner drains with [`poll_tasks`](OffscreenSurface::poll_tasks)
//! or [`process_next_task`](OffscreenSurface::process_next_task).
//!
//! There is exactly one backbuffer. The first flip after an allocation
//! transfers the buffer handle; later flips send an empty handle and the
//! consumer keeps reading the same memory, which is written in place.
//!
//! All methods must be called on the render thread that owns the surface.

mod builder;

pub use builder::OffscreenSurfaceBuilder;

use crate::client::{LatencyTracker, OutputSurfaceClient};
use crate::config::SurfaceConfig;
use crate::consumer::{ExternalRendererUpdater, FlipAck};
use crate::errors::SurfaceError;
use crate::gfx::{BufferHandle, ColorSpace, LatencyInfo, PresentationFeedback, Rect, Size, SwapTimings};
use crate::gpu::{FramebufferId, GpuContext, GpuMemoryBufferAllocator, SyncToken};
use crate::image::BufferImage;
use crate::task::{RenderTask, TaskQueue};
use crate::vsync::{GpuVSyncCallback, VSyncBridge};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Parameters of a [`reshape`](OffscreenSurface::reshape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReshapeParams {
    pub size: Size,
    pub color_space: ColorSpace,
}

impl ReshapeParams {
    pub fn new(size: Size, color_space: ColorSpace) -> Self {
        Self { size, color_space }
    }
}

/// A finished frame handed to [`swap_buffers`](OffscreenSurface::swap_buffers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSurfaceFrame {
    /// Must match the size of the last reshape.
    pub size: Size,
    pub latency_info: Vec<LatencyInfo>,
    /// Area that changed; the whole surface when `None`.
    pub damage: Option<Rect>,
}

impl OutputSurfaceFrame {
    pub fn new(size: Size, latency_info: Vec<LatencyInfo>) -> Self {
        Self {
            size,
            latency_info,
            damage: None,
        }
    }

    pub fn with_damage(mut self, damage: Rect) -> Self {
        self.damage = Some(damage);
        self
    }
}

/// What the compositor may assume about this surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    /// Draws never target the default (window) framebuffer.
    pub uses_default_framebuffer: bool,
    /// Vsync ticks can be delivered through [`OffscreenSurface::set_gpu_vsync_callback`].
    pub supports_gpu_vsync: bool,
}

/// Lifecycle state of the surface's backbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// No backbuffer.
    Unbacked,
    /// Backbuffer allocated but not attached to the framebuffer.
    BackedUnbound,
    /// Backbuffer attached, draw commands land in it.
    BackedBound,
    /// A swap is waiting for the GPU or the consumer.
    BackedPendingSwap,
}

/// A swap waiting for its sync token and then for the consumer's acknowledgement.
#[derive(Debug)]
struct PendingSwap {
    latency_info: Vec<LatencyInfo>,
    /// Backbuffer generation the frame was rendered into, `None` when there was no backbuffer.
    generation: Option<u64>,
    damage: Rect,
}

pub struct OffscreenSurface {
    config: SurfaceConfig,
    gl: Arc<dyn GpuContext>,
    allocator: Arc<dyn GpuMemoryBufferAllocator>,
    updater: Box<dyn ExternalRendererUpdater>,
    client: Box<dyn OutputSurfaceClient>,
    latency_tracker: Box<dyn LatencyTracker>,

    vsync: VSyncBridge,
    vsync_callback: Option<GpuVSyncCallback>,
    vsync_registered: bool,

    current: Option<BufferImage>,
    /// Bumped on every allocation so completions can tell whether "their" buffer still exists.
    generation: u64,
    /// The current buffer has not been handed to the consumer yet.
    new_texture: bool,
    fbo: Option<FramebufferId>,
    size: Size,
    color_space: ColorSpace,

    pending_swaps: BTreeMap<SyncToken, PendingSwap>,
    tasks: TaskQueue,
}

impl OffscreenSurface {
    /// Entry point to start building a surface.
    pub fn builder(
        gl: Arc<dyn GpuContext>,
        allocator: Arc<dyn GpuMemoryBufferAllocator>,
        updater: Box<dyn ExternalRendererUpdater>,
        client: Box<dyn OutputSurfaceClient>,
    ) -> OffscreenSurfaceBuilder {
        OffscreenSurfaceBuilder::new(gl, allocator, updater, client)
    }

    pub fn capabilities(&self) -> SurfaceCapabilities {
        SurfaceCapabilities {
            uses_default_framebuffer: false,
            supports_gpu_vsync: true,
        }
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Framebuffer draw commands should target, once a backbuffer exists.
    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.fbo
    }

    pub fn backbuffer(&self) -> Option<&BufferImage> {
        self.current.as_ref()
    }

    pub fn state(&self) -> SurfaceState {
        match &self.current {
            None => SurfaceState::Unbacked,
            Some(image) if image.is_bound() => SurfaceState::BackedBound,
            Some(_) if !self.pending_swaps.is_empty() => SurfaceState::BackedPendingSwap,
            Some(_) => SurfaceState::BackedUnbound,
        }
    }

    /// Number of swaps that have not run their after-swap bookkeeping yet.
    pub fn pending_swaps(&self) -> usize {
        self.pending_swaps.len()
    }

    /// Allocates a backbuffer at the current size, clamped to the maximum texture size.
    ///
    /// Does nothing while the size is empty. Any existing backbuffer is
    /// destroyed first. The framebuffer object is created once and reused for
    /// every later backbuffer.
    pub fn ensure_backbuffer(&mut self) -> Result<(), SurfaceError> {
        if self.size.is_empty() {
            return Ok(());
        }

        let max = self.config.effective_max_texture_size(self.gl.capabilities().max_texture_size);
        let texture_size = self.size.clamp_to(max);
        if texture_size != self.size {
            log::debug!("clamping backbuffer {} to {}", self.size, texture_size);
        }

        self.current = None;
        let mut image = BufferImage::new(self.gl.clone(), self.config.buffer_format);
        image.allocate(texture_size, self.color_space, self.allocator.as_ref())?;

        self.current = Some(image);
        self.generation += 1;
        self.new_texture = true;

        if self.fbo.is_none() {
            self.fbo = Some(self.gl.gen_framebuffer());
        }
        Ok(())
    }

    /// Destroys the backbuffer and the framebuffer object. The surface is unbacked afterwards.
    pub fn discard_backbuffer(&mut self) {
        // Dropping the image unbinds it before its texture is deleted.
        self.current = None;

        if let Some(fbo) = self.fbo.take() {
            self.gl.bind_framebuffer(fbo);
            self.gl.delete_framebuffer(fbo);
        }

        self.gl.flush();
    }

    /// Makes the backbuffer the render target, allocating it first if needed.
    ///
    /// When no backbuffer can be created this frame is dropped; the next call tries again.
    pub fn bind_framebuffer(&mut self) -> Result<(), SurfaceError> {
        if self.current.is_none() {
            if let Err(e) = self.ensure_backbuffer() {
                log::debug!("backbuffer allocation failed: {e}");
            }
        }

        match (self.current.as_mut(), self.fbo) {
            (Some(image), Some(fbo)) => image.bind(fbo),
            _ => {
                log::error!("No surface available to bind");
                Err(SurfaceError::NoBackbuffer)
            }
        }
    }

    /// Updates size and color space. Any change discards the backbuffer; the
    /// next bind allocates a new one.
    pub fn reshape(&mut self, params: ReshapeParams) {
        if self.size == params.size && self.color_space == params.color_space {
            return;
        }

        log::debug!("reshape {} -> {} ({:?})", self.size, params.size, params.color_space);
        self.size = params.size;
        self.color_space = params.color_space;
        self.discard_backbuffer();
    }

    /// Finishes the frame and schedules its hand-off for when the GPU is done.
    ///
    /// # Panics
    ///
    /// When `frame.size` differs from the reshaped size; the compositor and the
    /// surface disagree about what is being drawn.
    pub fn swap_buffers(&mut self, frame: OutputSurfaceFrame) {
        assert_eq!(frame.size, self.size, "swapped frame size does not match the surface size");

        self.gl.flush();
        if let Some(image) = self.current.as_mut() {
            image.unbind();
        }

        let full = Rect::from_size(self.size);
        let damage = frame.damage.map(|d| d.intersect(&full)).unwrap_or(full);

        let token = self.gl.gen_unverified_sync_token();
        self.pending_swaps.insert(
            token,
            PendingSwap {
                latency_info: frame.latency_info,
                generation: self.current.as_ref().map(|_| self.generation),
                damage,
            },
        );

        let sender = self.tasks.sender();
        self.gl.signal_sync_token(
            token,
            Box::new(move || {
                sender.post(RenderTask::SyncTokenSignaled { token });
            }),
        );
    }

    /// Registers the callback that receives vsync ticks on the render thread.
    ///
    /// The first non-empty callback subscribes to the vsync source. Passing
    /// `None` stops delivery but keeps the subscription.
    pub fn set_gpu_vsync_callback(&mut self, callback: Option<GpuVSyncCallback>) {
        if callback.is_some() && !self.vsync_registered {
            self.vsync.subscribe();
            self.vsync_registered = true;
        }
        self.vsync_callback = callback;
    }

    /// Handles every queued task without waiting. Returns how many ran.
    pub fn poll_tasks(&mut self) -> usize {
        let mut handled = 0;
        while let Some(task) = self.tasks.try_next() {
            self.handle_task(task);
            handled += 1;
        }
        handled
    }

    /// Waits for the next task and handles it. Cancel safe.
    pub async fn process_next_task(&mut self) -> bool {
        match self.tasks.next().await {
            Some(task) => {
                self.handle_task(task);
                true
            }
            None => false,
        }
    }

    fn handle_task(&mut self, task: RenderTask) {
        match task {
            RenderTask::VSync { timebase, interval } => self.on_vsync(timebase, interval),
            RenderTask::SyncTokenSignaled { token } => self.on_sync_wait_complete(token),
            RenderTask::FlipAcked { token } => {
                if let Some(swap) = self.pending_swaps.remove(&token) {
                    self.on_after_swap(&swap.latency_info);
                }
            }
        }
    }

    fn on_vsync(&mut self, timebase: Instant, interval: Duration) {
        // The callback may have been cleared after the tick was posted.
        if let Some(callback) = self.vsync_callback.as_mut() {
            callback(timebase, interval);
        }
    }

    fn on_sync_wait_complete(&mut self, token: SyncToken) {
        let Some(swap) = self.pending_swaps.get(&token) else {
            log::trace!("sync token {token:?} resolved for an unknown swap");
            return;
        };
        let damage = swap.damage;
        let buffer_alive = self.current.is_some() && swap.generation == Some(self.generation);

        let handle = match (&self.current, buffer_alive && self.new_texture) {
            (Some(image), true) => image.export(),
            _ => BufferHandle::empty(),
        };

        let now = Instant::now();
        self.client.did_receive_swap_buffers_ack(SwapTimings {
            swap_start: now,
            swap_end: now,
        });
        self.client
            .did_receive_presentation_feedback(PresentationFeedback::estimated(now, self.config.presentation_interval));

        if buffer_alive {
            log::trace!("flip {token:?} (new buffer: {})", self.new_texture);
            let done = FlipAck::new(token, self.tasks.sender());
            self.updater.on_after_flip(handle, self.new_texture, damage, done);
            self.new_texture = false;
        } else if let Some(swap) = self.pending_swaps.remove(&token) {
            // The buffer was discarded while the GPU was busy; nothing to hand off.
            self.on_after_swap(&swap.latency_info);
        }
    }

    fn on_after_swap(&mut self, latency_info: &[LatencyInfo]) {
        self.latency_tracker.on_gpu_swap_buffers_completed(latency_info);

        if self.config.needs_swap_size_notifications {
            self.client.did_swap_with_size(self.size);
        }
    }
}

impl Drop for OffscreenSurface {
    fn drop(&mut self) {
        self.tasks.revoke();
        self.discard_backbuffer();

        if self.vsync_registered {
            self.vsync.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BroadcastClient, SurfaceEvent};
    use crate::consumer::{ChannelRendererUpdater, FlipNotification};
    use crate::gpu::null::{GlCall, NullAllocator, NullContext};
    use crate::gpu::GpuCapabilities;
    use crate::gfx::TextureTarget;
    use crate::vsync::ManualVSyncSource;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tokio::sync::{broadcast, mpsc};

    const FULL_HD: Size = Size::new(1920, 1080);

    #[derive(Clone, Default)]
    struct RecordingTracker(Rc<RefCell<Vec<u64>>>);

    impl LatencyTracker for RecordingTracker {
        fn on_gpu_swap_buffers_completed(&mut self, latency_info: &[LatencyInfo]) {
            self.0.borrow_mut().extend(latency_info.iter().map(|l| l.trace_id));
        }
    }

    struct Harness {
        gl: Arc<NullContext>,
        allocator: Arc<NullAllocator>,
        vsync: Arc<ManualVSyncSource>,
        flips: mpsc::Receiver<FlipNotification>,
        events: broadcast::Receiver<SurfaceEvent>,
        completed: RecordingTracker,
        surface: OffscreenSurface,
    }

    fn harness_with(caps: GpuCapabilities, config: SurfaceConfig) -> Harness {
        let gl = Arc::new(NullContext::new(caps));
        let allocator = Arc::new(NullAllocator::new());
        let vsync = Arc::new(ManualVSyncSource::new());
        let (updater, flips) = ChannelRendererUpdater::new(16);
        let (client, events) = BroadcastClient::new(64);
        let completed = RecordingTracker::default();

        let surface = OffscreenSurface::builder(gl.clone(), allocator.clone(), Box::new(updater), Box::new(client))
            .config(config)
            .vsync_source(vsync.clone())
            .latency_tracker(Box::new(completed.clone()))
            .build()
            .unwrap();

        Harness {
            gl,
            allocator,
            vsync,
            flips,
            events,
            completed,
            surface,
        }
    }

    fn harness() -> Harness {
        harness_with(GpuCapabilities::default(), SurfaceConfig::default())
    }

    impl Harness {
        fn reshape(&mut self, size: Size) {
            self.surface.reshape(ReshapeParams::new(size, ColorSpace::Srgb));
        }

        fn swap(&mut self, trace_id: u64) {
            let size = self.surface.size();
            self.surface.swap_buffers(OutputSurfaceFrame::new(size, vec![LatencyInfo::new(trace_id)]));
        }

        /// Lets the GPU finish and runs the resulting completions.
        fn complete_gpu_work(&mut self) {
            self.gl.resolve_sync_tokens();
            self.surface.poll_tasks();
        }

        fn events(&mut self) -> Vec<SurfaceEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    #[test]
    fn bind_gives_stable_framebuffer() {
        let mut h = harness();
        h.reshape(FULL_HD);
        assert_eq!(h.surface.state(), SurfaceState::Unbacked);

        h.surface.bind_framebuffer().unwrap();
        let fbo = h.surface.framebuffer().unwrap();
        assert_ne!(fbo, FramebufferId(0));
        assert_eq!(h.surface.state(), SurfaceState::BackedBound);

        h.gl.clear_calls();
        h.surface.bind_framebuffer().unwrap();
        h.surface.bind_framebuffer().unwrap();

        assert_eq!(h.surface.framebuffer(), Some(fbo));
        assert_eq!(h.gl.calls(), vec![GlCall::BindFramebuffer(fbo), GlCall::BindFramebuffer(fbo)]);
        assert_eq!(h.allocator.allocations().len(), 1);
    }

    #[test]
    fn explicit_ensure_then_bind() {
        let mut h = harness();
        h.reshape(Size::new(320, 240));

        h.surface.ensure_backbuffer().unwrap();
        assert_eq!(h.surface.state(), SurfaceState::BackedUnbound);

        h.surface.bind_framebuffer().unwrap();
        assert_eq!(h.surface.state(), SurfaceState::BackedBound);
        assert_eq!(h.allocator.allocations().len(), 1);
    }

    #[test]
    fn ensure_backbuffer_ignores_empty_size() {
        let mut h = harness();
        h.surface.ensure_backbuffer().unwrap();
        assert_eq!(h.surface.state(), SurfaceState::Unbacked);
        assert!(h.allocator.allocations().is_empty());
        assert!(matches!(h.surface.bind_framebuffer(), Err(SurfaceError::NoBackbuffer)));
    }

    #[test]
    fn framebuffer_is_reused_across_reallocation() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.ensure_backbuffer().unwrap();
        let fbo = h.surface.framebuffer();

        h.surface.ensure_backbuffer().unwrap();
        assert_eq!(h.surface.framebuffer(), fbo);
        assert_eq!(h.allocator.allocations().len(), 2);
        assert_eq!(
            h.gl.calls().iter().filter(|c| matches!(c, GlCall::GenFramebuffer(_))).count(),
            1
        );
    }

    #[test]
    fn identical_reshape_keeps_backbuffer() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();

        h.reshape(FULL_HD);
        h.reshape(FULL_HD);

        assert_eq!(h.surface.state(), SurfaceState::BackedBound);
        assert_eq!(h.allocator.allocations().len(), 1);
    }

    #[test]
    fn changed_reshape_drops_backbuffer() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();

        h.reshape(Size::new(1280, 720));
        assert_eq!(h.surface.state(), SurfaceState::Unbacked);
        assert_eq!(h.surface.framebuffer(), None);
        assert_eq!(h.gl.live_objects(), 0);

        h.surface.bind_framebuffer().unwrap();
        assert_eq!(h.allocator.allocations()[1].size, Size::new(1280, 720));
    }

    #[test]
    fn color_space_change_drops_backbuffer() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();

        h.surface.reshape(ReshapeParams::new(FULL_HD, ColorSpace::DisplayP3));
        assert_eq!(h.surface.state(), SurfaceState::Unbacked);
    }

    #[test]
    fn handle_is_transferred_once_per_allocation() {
        let mut h = harness();
        h.reshape(FULL_HD);

        h.surface.bind_framebuffer().unwrap();
        h.swap(1);
        h.complete_gpu_work();
        let first = h.flips.try_recv().unwrap();
        assert!(first.new_texture);
        assert!(!first.handle.is_empty());
        assert_eq!(first.handle.buffer().map(|b| b.size), Some(FULL_HD));
        first.ack();
        h.surface.poll_tasks();

        h.surface.bind_framebuffer().unwrap();
        h.swap(2);
        h.complete_gpu_work();
        let second = h.flips.try_recv().unwrap();
        assert!(!second.new_texture);
        assert!(second.handle.is_empty());
        second.ack();
        h.surface.poll_tasks();

        // A new allocation transfers a new handle again.
        h.reshape(Size::new(800, 600));
        h.surface.bind_framebuffer().unwrap();
        h.swap(3);
        h.complete_gpu_work();
        let third = h.flips.try_recv().unwrap();
        assert!(third.new_texture);
        assert_eq!(third.handle.buffer().map(|b| b.size), Some(Size::new(800, 600)));
    }

    #[test]
    fn nothing_reaches_the_consumer_before_the_gpu_is_done() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();
        h.gl.clear_calls();

        h.swap(1);
        assert_eq!(h.surface.poll_tasks(), 0);
        assert!(h.flips.try_recv().is_err());
        assert_eq!(h.surface.state(), SurfaceState::BackedPendingSwap);
        assert!(h.events().is_empty());

        h.complete_gpu_work();
        assert!(h.flips.try_recv().is_ok());

        let calls = h.gl.calls();
        let flush = calls.iter().position(|c| *c == GlCall::Flush).unwrap();
        let resolved = calls.iter().position(|c| matches!(c, GlCall::SyncTokenResolved(_))).unwrap();
        assert!(flush < resolved);
    }

    #[test]
    fn swap_unbinds_the_backbuffer() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();
        h.gl.clear_calls();

        h.swap(1);

        let calls = h.gl.calls();
        assert_eq!(calls[0], GlCall::Flush);
        assert!(matches!(calls[2], GlCall::ReleaseTexImage(TextureTarget::Texture2D, _)));
        assert!(matches!(calls.last(), Some(GlCall::SignalSyncToken(_))));
        assert!(!h.surface.backbuffer().unwrap().is_bound());
    }

    #[test]
    fn completion_acks_compositor_and_runs_after_swap_on_flip_ack() {
        let config = SurfaceConfig::builder()
            .needs_swap_size_notifications(true)
            .presentation_interval(Duration::from_millis(16))
            .build()
            .unwrap();
        let mut h = harness_with(GpuCapabilities::default(), config);
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();
        h.swap(7);
        h.complete_gpu_work();

        let events = h.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SurfaceEvent::SwapAck(_)));
        match events[1] {
            SurfaceEvent::PresentationFeedback(fb) => {
                assert_eq!(fb.interval, Duration::from_millis(16));
                assert!(fb.flags.is_empty());
            }
            ref other => panic!("unexpected event {other:?}"),
        }
        assert!(h.completed.0.borrow().is_empty());

        h.flips.try_recv().unwrap().ack();
        h.surface.poll_tasks();

        assert_eq!(*h.completed.0.borrow(), vec![7]);
        assert_eq!(h.events(), vec![SurfaceEvent::SwapWithSize(FULL_HD)]);
        assert_eq!(h.surface.pending_swaps(), 0);
        assert_eq!(h.surface.state(), SurfaceState::BackedUnbound);
    }

    #[test]
    fn dropped_flips_still_complete_their_swaps() {
        let config = SurfaceConfig::builder().needs_swap_size_notifications(true).build().unwrap();
        let mut h = harness_with(GpuCapabilities::default(), config);
        h.reshape(FULL_HD);

        for trace_id in 1..=3 {
            h.surface.bind_framebuffer().unwrap();
            h.swap(trace_id);
            h.complete_gpu_work();
            drop(h.flips.try_recv().unwrap());
        }
        h.surface.poll_tasks();

        assert_eq!(h.surface.pending_swaps(), 0);
        assert_eq!(h.surface.state(), SurfaceState::BackedUnbound);
        assert_eq!(*h.completed.0.borrow(), vec![1, 2, 3]);
        let sizes = h.events().into_iter().filter(|e| matches!(e, SurfaceEvent::SwapWithSize(_))).count();
        assert_eq!(sizes, 3);
    }

    #[test]
    fn size_notifications_are_opt_in() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();
        h.swap(1);
        h.complete_gpu_work();
        h.flips.try_recv().unwrap().ack();
        h.surface.poll_tasks();

        assert_eq!(*h.completed.0.borrow(), vec![1]);
        assert!(!h.events().iter().any(|e| matches!(e, SurfaceEvent::SwapWithSize(_))));
    }

    #[test]
    fn damage_defaults_to_full_surface_and_is_clamped() {
        let mut h = harness();
        h.reshape(Size::new(100, 100));

        h.surface.bind_framebuffer().unwrap();
        h.swap(1);
        h.complete_gpu_work();
        let flip = h.flips.try_recv().unwrap();
        assert_eq!(flip.damage, Rect::new(0, 0, 100, 100));
        flip.ack();
        h.surface.poll_tasks();

        h.surface.bind_framebuffer().unwrap();
        h.surface.swap_buffers(
            OutputSurfaceFrame::new(Size::new(100, 100), vec![]).with_damage(Rect::new(90, 90, 50, 50)),
        );
        h.complete_gpu_work();
        assert_eq!(h.flips.try_recv().unwrap().damage, Rect::new(90, 90, 10, 10));
    }

    #[test]
    fn discard_unbinds_before_deleting() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();
        h.gl.clear_calls();

        h.surface.discard_backbuffer();

        let calls = h.gl.calls();
        let release = calls.iter().position(|c| matches!(c, GlCall::ReleaseTexImage(..))).unwrap();
        let delete_texture = calls.iter().position(|c| matches!(c, GlCall::DeleteTexture(_))).unwrap();
        let delete_fbo = calls.iter().position(|c| matches!(c, GlCall::DeleteFramebuffer(_))).unwrap();
        assert!(release < delete_texture);
        assert!(delete_texture < delete_fbo);
        assert_eq!(calls.last(), Some(&GlCall::Flush));
        assert_eq!(h.gl.live_objects(), 0);
        assert_eq!(h.surface.state(), SurfaceState::Unbacked);
    }

    #[test]
    fn allocation_failure_drops_the_frame_and_retries() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.allocator.set_fail(true);

        assert!(matches!(h.surface.bind_framebuffer(), Err(SurfaceError::NoBackbuffer)));
        assert_eq!(h.surface.state(), SurfaceState::Unbacked);
        assert_eq!(h.surface.framebuffer(), None);
        assert_eq!(h.allocator.allocations()[0].size, FULL_HD);

        h.allocator.set_fail(false);
        h.surface.bind_framebuffer().unwrap();
        assert_eq!(h.surface.state(), SurfaceState::BackedBound);
        assert_eq!(h.allocator.allocations().len(), 2);
    }

    #[test]
    fn image_import_failure_drops_the_frame() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.gl.set_fail_image_import(true);

        assert!(matches!(h.surface.bind_framebuffer(), Err(SurfaceError::NoBackbuffer)));
        assert!(matches!(h.surface.ensure_backbuffer(), Err(SurfaceError::ImageImportFailed(_))));
        assert_eq!(h.surface.state(), SurfaceState::Unbacked);
    }

    #[test]
    fn oversized_requests_are_clamped() {
        let caps = GpuCapabilities {
            max_texture_size: 4096,
            ..GpuCapabilities::default()
        };
        let mut h = harness_with(caps, SurfaceConfig::default());
        h.reshape(Size::new(5000, 5000));
        h.surface.bind_framebuffer().unwrap();

        assert_eq!(h.allocator.allocations()[0].size, Size::new(4096, 4096));
        assert_eq!(h.surface.backbuffer().unwrap().size(), Size::new(4096, 4096));
        // The surface keeps the requested size; swaps are validated against it.
        assert_eq!(h.surface.size(), Size::new(5000, 5000));
    }

    #[test]
    fn config_override_clamps_further() {
        let config = SurfaceConfig::builder().max_texture_size_override(1024).build().unwrap();
        let mut h = harness_with(GpuCapabilities::default(), config);
        h.reshape(Size::new(2000, 500));
        h.surface.bind_framebuffer().unwrap();

        assert_eq!(h.allocator.allocations()[0].size, Size::new(1024, 500));
    }

    #[test]
    #[should_panic(expected = "swapped frame size does not match")]
    fn swap_with_wrong_size_is_fatal() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();
        h.surface.swap_buffers(OutputSurfaceFrame::new(Size::new(10, 10), vec![]));
    }

    #[test]
    fn swap_without_backbuffer_completes_synchronously() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.allocator.set_fail(true);
        let _ = h.surface.bind_framebuffer();

        h.swap(4);
        h.complete_gpu_work();

        assert!(h.flips.try_recv().is_err());
        assert_eq!(*h.completed.0.borrow(), vec![4]);
        assert_eq!(h.events().len(), 2);
        assert_eq!(h.surface.pending_swaps(), 0);
    }

    #[test]
    fn discard_while_swap_is_pending_skips_the_flip() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();
        h.swap(5);

        h.reshape(Size::new(640, 480));
        h.complete_gpu_work();

        assert!(h.flips.try_recv().is_err());
        assert_eq!(*h.completed.0.borrow(), vec![5]);
        assert!(matches!(h.events()[0], SurfaceEvent::SwapAck(_)));
    }

    #[test]
    fn replaced_buffer_is_not_handed_off_for_an_old_frame() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();
        h.swap(1);

        h.reshape(Size::new(640, 480));
        h.surface.bind_framebuffer().unwrap();
        h.complete_gpu_work();

        // The frame belonged to the discarded buffer; the new one is still fresh.
        assert!(h.flips.try_recv().is_err());
        h.surface.swap_buffers(OutputSurfaceFrame::new(Size::new(640, 480), vec![]));
        h.complete_gpu_work();
        let flip = h.flips.try_recv().unwrap();
        assert!(flip.new_texture);
        assert!(!flip.handle.is_empty());
    }

    #[test]
    fn vsync_subscribes_once_on_first_callback() {
        let mut h = harness();
        assert_eq!(h.vsync.observer_count(), 0);

        h.surface.set_gpu_vsync_callback(None);
        assert_eq!(h.vsync.observer_count(), 0);

        h.surface.set_gpu_vsync_callback(Some(Box::new(|_, _| {})));
        h.surface.set_gpu_vsync_callback(Some(Box::new(|_, _| {})));
        assert_eq!(h.vsync.observer_count(), 1);
    }

    #[test]
    fn cleared_callback_swallows_late_ticks() {
        let mut h = harness();
        let seen = Rc::new(RefCell::new(0));
        let counter = seen.clone();
        h.surface
            .set_gpu_vsync_callback(Some(Box::new(move |_, _| *counter.borrow_mut() += 1)));

        h.vsync.tick(Instant::now(), Duration::from_millis(16));
        h.surface.set_gpu_vsync_callback(None);
        assert_eq!(h.surface.poll_tasks(), 1);

        assert_eq!(*seen.borrow(), 0);
        // Still subscribed; only delivery is gated.
        assert_eq!(h.vsync.observer_count(), 1);
    }

    #[tokio::test]
    async fn vsync_ticks_reach_the_render_thread_in_order() {
        let mut h = harness();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        h.surface.set_gpu_vsync_callback(Some(Box::new(move |timebase, interval| {
            sink.borrow_mut().push((timebase, interval))
        })));

        let start = Instant::now();
        let expected: Vec<_> = (0..20u32)
            .map(|n| (start + Duration::from_millis(16) * n, Duration::from_micros(16_667 + n as u64)))
            .collect();

        let ticks = expected.clone();
        let source = h.vsync.clone();
        std::thread::spawn(move || {
            for (timebase, interval) in ticks {
                source.tick(timebase, interval);
            }
        });

        for _ in 0..expected.len() {
            assert!(h.surface.process_next_task().await);
        }
        assert_eq!(*seen.borrow(), expected);
    }

    #[test]
    fn teardown_unsubscribes_and_releases_everything() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.set_gpu_vsync_callback(Some(Box::new(|_, _| {})));
        h.surface.bind_framebuffer().unwrap();
        h.swap(1);

        let Harness { gl, vsync, mut flips, surface, .. } = h;
        drop(surface);

        assert_eq!(vsync.observer_count(), 0);
        assert_eq!(gl.live_objects(), 0);

        // Late deliveries after teardown are no-ops.
        vsync.tick(Instant::now(), Duration::from_millis(16));
        assert_eq!(gl.resolve_sync_tokens(), 1);
        assert!(flips.try_recv().is_err());
    }

    #[test]
    fn flip_ack_after_teardown_is_harmless() {
        let mut h = harness();
        h.reshape(FULL_HD);
        h.surface.bind_framebuffer().unwrap();
        h.swap(1);
        h.complete_gpu_work();

        let flip = h.flips.try_recv().unwrap();
        let Harness { surface, completed, .. } = h;
        drop(surface);

        flip.ack();
        assert!(completed.0.borrow().is_empty());
    }

    #[test]
    fn capabilities_advertise_offscreen_vsync() {
        let h = harness();
        let caps = h.surface.capabilities();
        assert!(!caps.uses_default_framebuffer);
        assert!(caps.supports_gpu_vsync);
    }
}
