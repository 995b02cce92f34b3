//! Plain value types shared by the surface, the buffer image and the consumer side.
//!
//! Nothing in here talks to the GPU. These are the sizes, color spaces, buffer
//! formats and handles that flow between the compositor, the
//! [`OffscreenSurface`](crate::surface::OffscreenSurface) and the external consumer.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Size of a surface or buffer in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A size is empty when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamps each axis independently to `max`.
    pub fn clamp_to(&self, max: u32) -> Size {
        Size {
            width: self.width.min(max),
            height: self.height.min(max),
        }
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis aligned rectangle in surface pixels. Used for damage reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle at the origin covering `size`.
    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Returns the overlapping area of both rectangles. Disjoint rectangles
    /// produce an empty rect at the origin.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right <= left as i64 || bottom <= top as i64 {
            return Rect::default();
        }

        Rect::new(left, top, (right - left as i64) as u32, (bottom - top as i64) as u32)
    }
}

/// Color space a buffer is rendered in. Tagged on both the memory buffer and
/// the texture so the consumer can interpret the pixels correctly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    #[default]
    Srgb,
    DisplayP3,
    /// Linear extended sRGB (scRGB), used for HDR content.
    ExtendedSrgbLinear,
    Rec2020Pq,
}

/// Pixel layout of a GPU memory buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferFormat {
    #[default]
    Rgba8888,
    Bgra8888,
    Rgbx8888,
    /// Single channel, never scanout capable.
    R8,
}

impl BufferFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            BufferFormat::Rgba8888 | BufferFormat::Bgra8888 | BufferFormat::Rgbx8888 => 4,
            BufferFormat::R8 => 1,
        }
    }

    /// Can a buffer in this format be handed to a display engine or video sink directly?
    pub fn is_scanout_capable(&self) -> bool {
        !matches!(self, BufferFormat::R8)
    }
}

/// How a GPU memory buffer is going to be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    GpuRead,
    Scanout,
    ScanoutCpuReadWrite,
}

/// The texture target a texture must be bound as.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// `GL_TEXTURE_2D`
    #[default]
    Texture2D,
    /// `GL_TEXTURE_RECTANGLE_ARB`, used by IOSurface backed buffers.
    Rectangle,
    /// `GL_TEXTURE_EXTERNAL_OES`
    External,
}

/// Unique identifier of a physical GPU memory buffer.
///
/// Treat this as an opaque handle; the [`Uuid`] inside is an implementation detail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(Uuid);

impl BufferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BufferId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BufferId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a consumer needs to import a shared buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedBuffer {
    pub id: BufferId,
    pub size: Size,
    pub format: BufferFormat,
    pub stride: u32,
    pub color_space: ColorSpace,
    /// Platform handle value (dma-buf fd, DXGI shared handle, IOSurface id).
    pub native: u64,
}

/// Duplicable handle to a GPU memory buffer, suitable for transfer to an external consumer.
///
/// An empty handle tells the consumer to keep using the buffer it received last.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferHandle(Option<SharedBuffer>);

impl BufferHandle {
    pub fn new(buffer: SharedBuffer) -> Self {
        Self(Some(buffer))
    }

    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn buffer(&self) -> Option<&SharedBuffer> {
        self.0.as_ref()
    }
}

/// Latency bookkeeping that travels with a frame from swap to completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LatencyInfo {
    pub trace_id: u64,
    pub created: Instant,
}

impl LatencyInfo {
    pub fn new(trace_id: u64) -> Self {
        Self {
            trace_id,
            created: Instant::now(),
        }
    }
}

/// Timestamps reported with a swap acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapTimings {
    pub swap_start: Instant,
    pub swap_end: Instant,
}

bitflags! {
    /// Quality of a presentation timestamp.
    pub struct PresentationFlags: u32 {
        /// Timestamp is aligned with a vsync.
        const VSYNC         = 0b0001;
        /// Timestamp comes from a hardware clock.
        const HW_CLOCK      = 0b0010;
        /// Display engine signalled completion.
        const HW_COMPLETION = 0b0100;
        /// Buffer was scanned out without a copy.
        const ZERO_COPY     = 0b1000;
    }
}

/// Presentation feedback sent to the compositor after a swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentationFeedback {
    pub timestamp: Instant,
    pub interval: Duration,
    pub flags: PresentationFlags,
}

impl PresentationFeedback {
    /// Feedback without any measured display timing: only the submission time is known.
    pub fn estimated(timestamp: Instant, interval: Duration) -> Self {
        Self {
            timestamp,
            interval,
            flags: PresentationFlags::empty(),
        }
    }
}
