use crate::client::{LatencyTracker, LogLatencyTracker, OutputSurfaceClient};
use crate::config::{SurfaceConfig, DEFAULT_VSYNC_INTERVAL};
use crate::consumer::ExternalRendererUpdater;
use crate::errors::SurfaceError;
use crate::gfx::{ColorSpace, Size};
use crate::gpu::{GpuContext, GpuMemoryBufferAllocator};
use crate::surface::OffscreenSurface;
use crate::task::TaskQueue;
use crate::vsync::{TimerVSyncSource, VSyncBridge, VSyncSource};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct OffscreenSurfaceBuilder {
    gl: Arc<dyn GpuContext>,
    allocator: Arc<dyn GpuMemoryBufferAllocator>,
    updater: Box<dyn ExternalRendererUpdater>,
    client: Box<dyn OutputSurfaceClient>,
    config: Option<SurfaceConfig>,
    vsync_source: Option<Arc<dyn VSyncSource>>,
    latency_tracker: Option<Box<dyn LatencyTracker>>,
}

impl OffscreenSurfaceBuilder {
    pub(crate) fn new(
        gl: Arc<dyn GpuContext>,
        allocator: Arc<dyn GpuMemoryBufferAllocator>,
        updater: Box<dyn ExternalRendererUpdater>,
        client: Box<dyn OutputSurfaceClient>,
    ) -> Self {
        Self {
            gl,
            allocator,
            updater,
            client,
            config: None,
            vsync_source: None,
            latency_tracker: None,
        }
    }

    pub fn config(mut self, cfg: SurfaceConfig) -> Self {
        self.config = Some(cfg);
        self
    }

    /// Source of vsync ticks. Defaults to a timer source at the configured interval.
    pub fn vsync_source(mut self, source: Arc<dyn VSyncSource>) -> Self {
        self.vsync_source = Some(source);
        self
    }

    pub fn latency_tracker(mut self, tracker: Box<dyn LatencyTracker>) -> Self {
        self.latency_tracker = Some(tracker);
        self
    }

    /// Creates the surface. Fails when the config does not validate.
    pub fn build(self) -> Result<OffscreenSurface, SurfaceError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let vsync_source = self.vsync_source.unwrap_or_else(|| {
            if config.vsync_interval == DEFAULT_VSYNC_INTERVAL {
                TimerVSyncSource::global()
            } else {
                Arc::new(TimerVSyncSource::new(config.vsync_interval))
            }
        });

        let tasks = TaskQueue::new();
        let vsync = VSyncBridge::new(vsync_source, tasks.sender());
        log::debug!("created offscreen surface (vsync bridge {})", vsync.id());

        Ok(OffscreenSurface {
            config,
            gl: self.gl,
            allocator: self.allocator,
            updater: self.updater,
            client: self.client,
            latency_tracker: self
                .latency_tracker
                .unwrap_or_else(|| Box::new(LogLatencyTracker::new())),
            vsync,
            vsync_callback: None,
            vsync_registered: false,
            current: None,
            generation: 0,
            new_texture: false,
            fbo: None,
            size: Size::default(),
            color_space: ColorSpace::default(),
            pending_swaps: BTreeMap::new(),
            tasks,
        })
    }
}
