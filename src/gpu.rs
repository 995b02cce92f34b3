//! Interfaces to the GPU collaborators the surface depends on.
//!
//! The surface never submits GPU work itself beyond the handful of GL-style calls
//! it needs to attach a texture to a framebuffer. Everything is expressed through
//! [`GpuContext`] and [`GpuMemoryBufferAllocator`], so any command-buffer client
//! can sit underneath. [`null`] provides recording implementations that do no
//! rendering at all.

/// GPU memory buffers and their allocator.
pub mod buffer;
/// GL-style context, capabilities and sync tokens.
pub mod context;
/// Recording implementations that do not render.
pub mod null;

pub use buffer::{GpuMemoryBuffer, GpuMemoryBufferAllocator};
pub use context::{
    FramebufferId, GpuCapabilities, GpuContext, ImageId, SyncCallback, SyncToken, TextureId,
};
