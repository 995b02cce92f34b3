//! Off-screen output surface for a GPU compositor.
//!
//! The compositor renders into a GPU memory buffer instead of a window. Once
//! the GPU has finished a frame, the buffer is handed to an external consumer
//! (a remote display, a video sink, another process) together with a
//! continuation that the consumer invokes when it is done with the frame.
//!
//! The entry point is [`OffscreenSurface`]. GPU work goes through the
//! [`GpuContext`](gpu::GpuContext) and
//! [`GpuMemoryBufferAllocator`](gpu::GpuMemoryBufferAllocator) traits; the
//! [`gpu::null`] module provides implementations without a real GPU.

pub mod client;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod gfx;
pub mod gpu;
pub mod image;
pub mod surface;
pub mod vsync;

mod task;

pub use client::{
    BroadcastClient, LatencyTracker, LogLatencyTracker, OutputSurfaceClient, SurfaceEvent,
};
pub use config::{SurfaceConfig, SurfaceConfigBuilder};
pub use consumer::{ChannelRendererUpdater, ExternalRendererUpdater, FlipAck, FlipNotification};
pub use errors::{GpuError, SurfaceError};
pub use surface::{
    OffscreenSurface, OffscreenSurfaceBuilder, OutputSurfaceFrame, ReshapeParams,
    SurfaceCapabilities, SurfaceState,
};
pub use vsync::{GpuVSyncCallback, VSyncSource};

/// Default capacity of the channels handed out to consumers and listeners.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
