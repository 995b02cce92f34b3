//! Surface configuration.
//!
//! `SurfaceConfig` controls the tunables of a single
//! [`OffscreenSurface`](crate::surface::OffscreenSurface). It provides sensible
//! defaults via [`Default`], deserializes from JSON (missing fields fall back to
//! the defaults) and has a fluent [`SurfaceConfig::builder()`] with validation.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use osr_surface::config::SurfaceConfig;
//! let cfg = SurfaceConfig::default();
//! assert!(!cfg.needs_swap_size_notifications);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use std::time::Duration;
//! use osr_surface::config::SurfaceConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = SurfaceConfig::builder()
//!     .needs_swap_size_notifications(true)
//!     .presentation_interval(Duration::from_millis(16))
//!     .max_texture_size_override(2048)
//!     .build()?;
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `needs_swap_size_notifications`: report the surface size to the compositor after every swap.
//! - `presentation_interval`: interval sent with presentation feedback. No display engine
//!   timing is measured, so this is an estimate (default: zero).
//! - `buffer_format`: format of the backbuffer (default: RGBA-8888). Must be scanout capable.
//! - `max_texture_size_override`: clamp allocations below the GPU maximum texture size.
//! - `vsync_interval`: tick period when the surface drives its own timer vsync source
//!   (default: 1/60 s).

use crate::gfx::BufferFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default vsync period (60 Hz).
pub const DEFAULT_VSYNC_INTERVAL: Duration = Duration::from_nanos(16_666_667);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub needs_swap_size_notifications: bool,
    pub presentation_interval: Duration,
    pub buffer_format: BufferFormat,
    pub max_texture_size_override: Option<u32>,
    pub vsync_interval: Duration,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            needs_swap_size_notifications: false,
            presentation_interval: Duration::ZERO,
            buffer_format: BufferFormat::Rgba8888,
            max_texture_size_override: None,
            vsync_interval: DEFAULT_VSYNC_INTERVAL,
        }
    }
}

impl SurfaceConfig {
    pub fn builder() -> SurfaceConfigBuilder {
        SurfaceConfigBuilder::default()
    }

    /// Parses a JSON document and validates the result.
    pub fn from_json(json: &str) -> Result<SurfaceConfig, ConfigError> {
        let cfg: SurfaceConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        validate(&cfg)?;
        Ok(cfg)
    }

    /// Checks the same rules the builder enforces. Useful for configs assembled field by field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate(self)
    }

    /// Largest texture dimension we allow, given what the GPU supports.
    pub fn effective_max_texture_size(&self, gpu_max: u32) -> u32 {
        match self.max_texture_size_override {
            Some(limit) => limit.min(gpu_max),
            None => gpu_max,
        }
    }
}

/// Builder for [`SurfaceConfig`].
#[derive(Debug, Clone, Default)]
pub struct SurfaceConfigBuilder {
    inner: SurfaceConfig,
}

impl SurfaceConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut SurfaceConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn needs_swap_size_notifications(self, on: bool) -> Self { self.map(|c| c.needs_swap_size_notifications = on) }
    pub fn presentation_interval(self, interval: Duration) -> Self { self.map(|c| c.presentation_interval = interval) }
    pub fn buffer_format(self, format: BufferFormat) -> Self { self.map(|c| c.buffer_format = format) }
    pub fn max_texture_size_override(self, px: u32) -> Self { self.map(|c| c.max_texture_size_override = Some(px)) }
    pub fn vsync_interval(self, interval: Duration) -> Self { self.map(|c| c.vsync_interval = interval) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut SurfaceConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<SurfaceConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NotScanoutCapable(BufferFormat),
    ZeroTextureSize,
    ZeroVSyncInterval,
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotScanoutCapable(format) =>
                write!(f, "buffer_format {format:?} cannot be used for scanout"),
            ConfigError::ZeroTextureSize =>
                write!(f, "max_texture_size_override must be at least 1"),
            ConfigError::ZeroVSyncInterval =>
                write!(f, "vsync_interval must be non-zero"),
            ConfigError::Parse(msg) =>
                write!(f, "cannot parse surface config: {msg}"),
        }
    }
}
impl std::error::Error for ConfigError {}

fn validate(c: &SurfaceConfig) -> Result<(), ConfigError> {
    if !c.buffer_format.is_scanout_capable() {
        return Err(ConfigError::NotScanoutCapable(c.buffer_format));
    }
    if c.max_texture_size_override == Some(0) {
        return Err(ConfigError::ZeroTextureSize);
    }
    if c.vsync_interval.is_zero() {
        return Err(ConfigError::ZeroVSyncInterval);
    }
    Ok(())
}
