use crate::config::ConfigError;
use crate::gfx::Size;

/// Error reported by the GPU context, carrying the context's error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("GPU context error 0x{code:04x}")]
pub struct GpuError {
    pub code: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("failed to allocate a {size} GPU memory buffer")]
    AllocationFailed { size: Size },

    #[error("could not import GPU memory buffer as an image: {0}")]
    ImageImportFailed(#[from] GpuError),

    #[error("buffer image has no texture or image allocated")]
    Unallocated,

    #[error("no surface available to bind")]
    NoBackbuffer,

    #[error("invalid surface configuration: {0}")]
    Config(#[from] ConfigError),
}
