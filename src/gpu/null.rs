//! GPU collaborators that record what they are asked to do without rendering anything.
//!
//! [`NullContext`] keeps a log of every call as a [`GlCall`] and tracks which GPU
//! objects are alive, so hosts and tests can check call ordering and leaks.
//! Sync tokens resolve only when [`NullContext::resolve_sync_tokens`] is called,
//! which gives the caller full control over when "the GPU finishes".

use crate::errors::GpuError;
use crate::gfx::{BufferFormat, BufferHandle, BufferId, BufferUsage, ColorSpace, SharedBuffer, Size, TextureTarget};
use crate::gpu::{
    FramebufferId, GpuCapabilities, GpuContext, GpuMemoryBuffer, GpuMemoryBufferAllocator, ImageId,
    SyncCallback, SyncToken, TextureId,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// `GL_INVALID_OPERATION`, reported when image import is forced to fail.
pub const GL_INVALID_OPERATION: u32 = 0x0502;

/// A single recorded call on a [`NullContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlCall {
    GenTexture(TextureId),
    DeleteTexture(TextureId),
    BindTexture(TextureTarget, TextureId),
    CreateImage(ImageId, Size),
    DestroyImage(ImageId),
    BindTexImage(TextureTarget, ImageId),
    ReleaseTexImage(TextureTarget, ImageId),
    SetColorSpace(TextureId, ColorSpace),
    GenFramebuffer(FramebufferId),
    DeleteFramebuffer(FramebufferId),
    BindFramebuffer(FramebufferId),
    FramebufferTexture2D(TextureTarget, TextureId),
    Flush,
    GenSyncToken(SyncToken),
    SignalSyncToken(SyncToken),
    SyncTokenResolved(SyncToken),
}

#[derive(Default)]
struct NullState {
    calls: Vec<GlCall>,
    next_name: u32,
    next_fence: u64,
    submitted_fence: u64,
    pending: Vec<(SyncToken, SyncCallback)>,
    live_textures: HashSet<TextureId>,
    live_images: HashSet<ImageId>,
    live_framebuffers: HashSet<FramebufferId>,
    fail_image_import: bool,
}

impl NullState {
    fn name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }
}

/// GPU context that does not perform any rendering.
pub struct NullContext {
    capabilities: GpuCapabilities,
    state: Mutex<NullState>,
}

impl Default for NullContext {
    fn default() -> Self {
        Self::new(GpuCapabilities::default())
    }
}

impl NullContext {
    pub fn new(capabilities: GpuCapabilities) -> Self {
        Self {
            capabilities,
            state: Mutex::new(NullState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, NullState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: GlCall) {
        self.state().calls.push(call);
    }

    /// Makes every following image import fail (or succeed again).
    pub fn set_fail_image_import(&self, fail: bool) {
        self.state().fail_image_import = fail;
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<GlCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Number of textures, images and framebuffers that have not been deleted.
    pub fn live_objects(&self) -> usize {
        let state = self.state();
        state.live_textures.len() + state.live_images.len() + state.live_framebuffers.len()
    }

    /// Number of sync token callbacks waiting for [`resolve_sync_tokens`](Self::resolve_sync_tokens).
    pub fn pending_sync_tokens(&self) -> usize {
        self.state().pending.len()
    }

    /// Pretends the GPU finished all submitted work and fires the callbacks of
    /// every signalled token that was submitted. Returns the number of callbacks run.
    pub fn resolve_sync_tokens(&self) -> usize {
        let ready: Vec<(SyncToken, SyncCallback)> = {
            let mut state = self.state();
            let submitted = state.submitted_fence;
            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|(token, _)| token.0 <= submitted);
            state.pending = waiting;
            for (token, _) in &ready {
                state.calls.push(GlCall::SyncTokenResolved(*token));
            }
            ready
        };

        let count = ready.len();
        // Callbacks run without the lock held; they are free to call back into the context.
        for (_, callback) in ready {
            callback();
        }
        count
    }
}

impl GpuContext for NullContext {
    fn capabilities(&self) -> GpuCapabilities {
        self.capabilities
    }

    fn gen_texture(&self) -> TextureId {
        let mut state = self.state();
        let texture = TextureId(state.name());
        state.live_textures.insert(texture);
        state.calls.push(GlCall::GenTexture(texture));
        texture
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut state = self.state();
        state.live_textures.remove(&texture);
        state.calls.push(GlCall::DeleteTexture(texture));
    }

    fn bind_texture(&self, target: TextureTarget, texture: TextureId) {
        self.record(GlCall::BindTexture(target, texture));
    }

    fn create_image(&self, _buffer: &dyn GpuMemoryBuffer, size: Size) -> Result<ImageId, GpuError> {
        let mut state = self.state();
        if state.fail_image_import {
            return Err(GpuError { code: GL_INVALID_OPERATION });
        }
        let image = ImageId(state.name());
        state.live_images.insert(image);
        state.calls.push(GlCall::CreateImage(image, size));
        Ok(image)
    }

    fn destroy_image(&self, image: ImageId) {
        let mut state = self.state();
        state.live_images.remove(&image);
        state.calls.push(GlCall::DestroyImage(image));
    }

    fn bind_tex_image(&self, target: TextureTarget, image: ImageId) {
        self.record(GlCall::BindTexImage(target, image));
    }

    fn release_tex_image(&self, target: TextureTarget, image: ImageId) {
        self.record(GlCall::ReleaseTexImage(target, image));
    }

    fn set_color_space_metadata(&self, texture: TextureId, color_space: ColorSpace) {
        self.record(GlCall::SetColorSpace(texture, color_space));
    }

    fn gen_framebuffer(&self) -> FramebufferId {
        let mut state = self.state();
        let fbo = FramebufferId(state.name());
        state.live_framebuffers.insert(fbo);
        state.calls.push(GlCall::GenFramebuffer(fbo));
        fbo
    }

    fn delete_framebuffer(&self, fbo: FramebufferId) {
        let mut state = self.state();
        state.live_framebuffers.remove(&fbo);
        state.calls.push(GlCall::DeleteFramebuffer(fbo));
    }

    fn bind_framebuffer(&self, fbo: FramebufferId) {
        self.record(GlCall::BindFramebuffer(fbo));
    }

    fn framebuffer_texture_2d(&self, target: TextureTarget, texture: TextureId) {
        self.record(GlCall::FramebufferTexture2D(target, texture));
    }

    fn flush(&self) {
        let mut state = self.state();
        state.submitted_fence = state.next_fence;
        state.calls.push(GlCall::Flush);
    }

    fn gen_unverified_sync_token(&self) -> SyncToken {
        let mut state = self.state();
        state.next_fence += 1;
        let token = SyncToken(state.next_fence);
        state.calls.push(GlCall::GenSyncToken(token));
        token
    }

    fn signal_sync_token(&self, token: SyncToken, callback: SyncCallback) {
        let mut state = self.state();
        // Signalling goes through the command stream and submits everything up to the token.
        state.submitted_fence = state.submitted_fence.max(token.0);
        state.calls.push(GlCall::SignalSyncToken(token));
        state.pending.push((token, callback));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    pub size: Size,
    pub format: BufferFormat,
    pub usage: BufferUsage,
}

#[derive(Default)]
struct AllocatorState {
    fail: bool,
    allocations: Vec<AllocationRecord>,
}

/// Allocator handing out [`NullBuffer`]s. Can be told to fail.
#[derive(Default)]
pub struct NullAllocator {
    state: Mutex<AllocatorState>,
}

impl NullAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every following allocation return `None` (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        self.state().fail = fail;
    }

    /// Every allocation request seen so far, including failed ones.
    pub fn allocations(&self) -> Vec<AllocationRecord> {
        self.state().allocations.clone()
    }
}

impl GpuMemoryBufferAllocator for NullAllocator {
    fn create_gpu_memory_buffer(
        &self,
        size: Size,
        format: BufferFormat,
        usage: BufferUsage,
    ) -> Option<Box<dyn GpuMemoryBuffer>> {
        let mut state = self.state();
        state.allocations.push(AllocationRecord { size, format, usage });
        if state.fail {
            return None;
        }
        Some(Box::new(NullBuffer::new(size, format)))
    }
}

static NEXT_NATIVE_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Memory buffer without backing storage.
pub struct NullBuffer {
    id: BufferId,
    size: Size,
    format: BufferFormat,
    color_space: ColorSpace,
    native: u64,
}

impl NullBuffer {
    pub fn new(size: Size, format: BufferFormat) -> Self {
        Self {
            id: BufferId::new(),
            size,
            format,
            color_space: ColorSpace::default(),
            native: NEXT_NATIVE_HANDLE.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl GpuMemoryBuffer for NullBuffer {
    fn id(&self) -> BufferId {
        self.id
    }

    fn size(&self) -> Size {
        self.size
    }

    fn format(&self) -> BufferFormat {
        self.format
    }

    fn set_color_space(&mut self, color_space: ColorSpace) {
        self.color_space = color_space;
    }

    fn clone_handle(&self) -> BufferHandle {
        BufferHandle::new(SharedBuffer {
            id: self.id,
            size: self.size,
            format: self.format,
            stride: self.size.width * self.format.bytes_per_pixel(),
            color_space: self.color_space,
            native: self.native,
        })
    }
}
