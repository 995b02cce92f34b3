use crate::errors::GpuError;
use crate::gfx::{BufferFormat, BufferUsage, ColorSpace, Size, TextureTarget};
use crate::gpu::GpuMemoryBuffer;

/// GPU texture name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// GPU image name, binding a memory buffer to a texture.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u32);

/// Framebuffer object name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

/// Marker for a point in the GPU command stream. Tokens are generated in
/// increasing order, so a later token always compares greater.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncToken(pub u64);

/// Invoked once the work up to a sync token has finished on the GPU. May run on any thread.
pub type SyncCallback = Box<dyn FnOnce() + Send + 'static>;

/// Limits and properties of the GPU context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCapabilities {
    /// Largest texture dimension supported, per axis.
    pub max_texture_size: u32,
    /// Target scanout buffers must be bound as on this platform.
    pub scanout_texture_target: TextureTarget,
}

impl Default for GpuCapabilities {
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            scanout_texture_target: TextureTarget::Texture2D,
        }
    }
}

impl GpuCapabilities {
    /// Texture target for a buffer of `format` allocated with `usage`.
    pub fn texture_target_for(&self, format: BufferFormat, usage: BufferUsage) -> TextureTarget {
        match usage {
            BufferUsage::Scanout | BufferUsage::ScanoutCpuReadWrite if format.is_scanout_capable() => {
                self.scanout_texture_target
            }
            _ => TextureTarget::Texture2D,
        }
    }
}

/// GL-style GPU context. All calls occur on the render thread, except that
/// [`SyncCallback`]s registered through [`GpuContext::signal_sync_token`] may
/// be invoked from elsewhere.
pub trait GpuContext {
    fn capabilities(&self) -> GpuCapabilities;

    fn gen_texture(&self) -> TextureId;
    fn delete_texture(&self, texture: TextureId);
    fn bind_texture(&self, target: TextureTarget, texture: TextureId);

    /// Imports a memory buffer as an image object.
    fn create_image(&self, buffer: &dyn GpuMemoryBuffer, size: Size) -> Result<ImageId, GpuError>;
    fn destroy_image(&self, image: ImageId);
    /// Attaches `image` as the storage of the texture currently bound to `target`.
    fn bind_tex_image(&self, target: TextureTarget, image: ImageId);
    /// Detaches `image` from the texture currently bound to `target`.
    fn release_tex_image(&self, target: TextureTarget, image: ImageId);
    fn set_color_space_metadata(&self, texture: TextureId, color_space: ColorSpace);

    fn gen_framebuffer(&self) -> FramebufferId;
    fn delete_framebuffer(&self, fbo: FramebufferId);
    fn bind_framebuffer(&self, fbo: FramebufferId);
    /// Attaches `texture` to color attachment 0 of the bound framebuffer.
    fn framebuffer_texture_2d(&self, target: TextureTarget, texture: TextureId);

    fn flush(&self);

    /// Generates a token covering all commands issued so far.
    fn gen_unverified_sync_token(&self) -> SyncToken;
    /// Runs `callback` once the GPU has finished all work up to `token`.
    fn signal_sync_token(&self, token: SyncToken, callback: SyncCallback);
}
