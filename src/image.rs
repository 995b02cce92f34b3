//! GPU-backed backbuffer image.
//!
//! A [`BufferImage`] owns one scanout-capable GPU memory buffer, the image
//! object importing it into the GPU context and the texture the image is
//! attached to. It moves through three states:
//!
//! - **unallocated**: nothing exists (initial state, or allocation failed),
//! - **allocated**: buffer, image and texture exist but are not attached to a framebuffer,
//! - **bound**: the texture is the color attachment of exactly one framebuffer.
//!
//! GPU calls are only issued on transitions between these states.

use crate::errors::SurfaceError;
use crate::gfx::{BufferFormat, BufferHandle, BufferUsage, ColorSpace, Size, TextureTarget};
use crate::gpu::{FramebufferId, GpuContext, GpuMemoryBuffer, GpuMemoryBufferAllocator, ImageId, TextureId};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageState {
    Unallocated,
    Allocated { texture: TextureId, image: ImageId },
    Bound { texture: TextureId, image: ImageId, fbo: FramebufferId },
}

pub struct BufferImage {
    gl: Arc<dyn GpuContext>,
    size: Size,
    color_space: ColorSpace,
    format: BufferFormat,
    texture_target: TextureTarget,
    buffer: Option<Box<dyn GpuMemoryBuffer>>,
    state: ImageState,
}

impl Debug for BufferImage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferImage")
            .field("size", &self.size)
            .field("color_space", &self.color_space)
            .field("texture_target", &self.texture_target)
            .field("state", &self.state)
            .finish()
    }
}

impl BufferImage {
    /// Creates an unallocated image for buffers of `format`.
    pub fn new(gl: Arc<dyn GpuContext>, format: BufferFormat) -> Self {
        let texture_target = gl.capabilities().texture_target_for(format, BufferUsage::Scanout);
        Self {
            gl,
            size: Size::default(),
            color_space: ColorSpace::default(),
            format,
            texture_target,
            buffer: None,
            state: ImageState::Unallocated,
        }
    }

    /// Allocates the memory buffer, imports it as an image and creates the texture.
    ///
    /// On failure the image stays unallocated and the error has already been logged.
    /// Anything allocated before is released first.
    pub fn allocate(
        &mut self,
        size: Size,
        color_space: ColorSpace,
        allocator: &dyn GpuMemoryBufferAllocator,
    ) -> Result<(), SurfaceError> {
        self.release();
        self.size = size;
        self.color_space = color_space;

        let Some(mut buffer) = allocator.create_gpu_memory_buffer(size, self.format, BufferUsage::Scanout) else {
            log::error!("failed to allocate {size} GPU memory buffer");
            return Err(SurfaceError::AllocationFailed { size });
        };
        buffer.set_color_space(color_space);

        let image = match self.gl.create_image(buffer.as_ref(), size) {
            Ok(image) => image,
            Err(e) => {
                log::error!("could not import {size} GPU memory buffer as image: {e}");
                return Err(SurfaceError::ImageImportFailed(e));
            }
        };

        let texture = self.gl.gen_texture();
        self.buffer = Some(buffer);
        self.state = ImageState::Allocated { texture, image };
        log::debug!("allocated {size} backbuffer image {image:?} / texture {texture:?}");
        Ok(())
    }

    /// Duplicable handle to the underlying buffer, empty when unallocated.
    pub fn export(&self) -> BufferHandle {
        match (&self.buffer, self.state) {
            (Some(buffer), ImageState::Allocated { .. } | ImageState::Bound { .. }) => buffer.clone_handle(),
            _ => BufferHandle::empty(),
        }
    }

    /// Attaches the texture to `fbo` and makes `fbo` the active framebuffer.
    ///
    /// Binding again to the framebuffer we are attached to only re-binds the
    /// framebuffer; multi-pass rendering does this several times per frame.
    pub fn bind(&mut self, fbo: FramebufferId) -> Result<(), SurfaceError> {
        let (texture, image) = match self.state {
            ImageState::Bound { fbo: bound, .. } if bound == fbo => {
                self.gl.bind_framebuffer(fbo);
                return Ok(());
            }
            ImageState::Bound { fbo: bound, .. } => {
                log::debug!("moving image from framebuffer {bound:?} to {fbo:?}");
                self.unbind();
                return self.bind(fbo);
            }
            ImageState::Unallocated => {
                log::error!("cannot bind unallocated buffer image to framebuffer {fbo:?}");
                return Err(SurfaceError::Unallocated);
            }
            ImageState::Allocated { texture, image } => (texture, image),
        };

        self.gl.bind_texture(self.texture_target, texture);
        self.gl.bind_tex_image(self.texture_target, image);
        self.gl.set_color_space_metadata(texture, self.color_space);

        self.gl.bind_framebuffer(fbo);
        self.gl.framebuffer_texture_2d(self.texture_target, texture);

        self.state = ImageState::Bound { texture, image, fbo };
        Ok(())
    }

    /// Detaches the image from the texture and flushes. No-op unless bound.
    pub fn unbind(&mut self) {
        let ImageState::Bound { texture, image, .. } = self.state else {
            return;
        };

        self.gl.bind_texture(self.texture_target, texture);
        self.gl.release_tex_image(self.texture_target, image);
        self.gl.flush();

        self.state = ImageState::Allocated { texture, image };
    }

    fn release(&mut self) {
        self.unbind();
        if let ImageState::Allocated { texture, image } = self.state {
            self.gl.delete_texture(texture);
            self.gl.destroy_image(image);
        }
        self.state = ImageState::Unallocated;
        self.buffer = None;
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn texture_target(&self) -> TextureTarget {
        self.texture_target
    }

    pub fn is_allocated(&self) -> bool {
        !matches!(self.state, ImageState::Unallocated)
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, ImageState::Bound { .. })
    }

    /// Framebuffer the texture is attached to, if bound.
    pub fn bound_framebuffer(&self) -> Option<FramebufferId> {
        match self.state {
            ImageState::Bound { fbo, .. } => Some(fbo),
            _ => None,
        }
    }

    pub fn texture(&self) -> Option<TextureId> {
        match self.state {
            ImageState::Allocated { texture, .. } | ImageState::Bound { texture, .. } => Some(texture),
            ImageState::Unallocated => None,
        }
    }
}

impl Drop for BufferImage {
    fn drop(&mut self) {
        self.release();
    }
}
