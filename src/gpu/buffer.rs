use crate::gfx::{BufferFormat, BufferHandle, BufferId, BufferUsage, ColorSpace, Size};

/// A GPU memory buffer that can be imported as an image and shared with another process.
pub trait GpuMemoryBuffer: Send {
    /// Identity of the physical buffer.
    fn id(&self) -> BufferId;

    fn size(&self) -> Size;

    fn format(&self) -> BufferFormat;

    /// Tags the buffer with the color space its contents are rendered in.
    fn set_color_space(&mut self, color_space: ColorSpace);

    /// Duplicates the platform handle so it can be transferred to a consumer.
    fn clone_handle(&self) -> BufferHandle;
}

/// Allocates GPU memory buffers. Calls occur on the render thread.
pub trait GpuMemoryBufferAllocator {
    /// Returns `None` when the allocation fails.
    fn create_gpu_memory_buffer(
        &self,
        size: Size,
        format: BufferFormat,
        usage: BufferUsage,
    ) -> Option<Box<dyn GpuMemoryBuffer>>;
}
