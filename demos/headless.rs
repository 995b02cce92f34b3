//! Drives an offscreen surface without a GPU.
//!
//! Renders a handful of frames at 60 Hz into a `NullContext`, resizes halfway
//! through, and lets a consumer task acknowledge every flip. Run with
//! `RUST_LOG=debug` to follow the surface lifecycle.

use osr_surface::gfx::{ColorSpace, LatencyInfo, Size};
use osr_surface::gpu::null::{NullAllocator, NullContext};
use osr_surface::{
    BroadcastClient, ChannelRendererUpdater, OffscreenSurface, OutputSurfaceFrame, ReshapeParams, SurfaceConfig,
    SurfaceEvent, DEFAULT_CHANNEL_CAPACITY,
};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const FRAMES: u64 = 12;
const RESIZE_AT: u64 = 6;
const TASK_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = SurfaceConfig::from_json(r#"{ "needs_swap_size_notifications": true }"#)?;

    let gl = Arc::new(NullContext::default());
    let allocator = Arc::new(NullAllocator::new());
    let (updater, mut flips) = ChannelRendererUpdater::new(DEFAULT_CHANNEL_CAPACITY);
    let (client, mut events) = BroadcastClient::new(DEFAULT_CHANNEL_CAPACITY);

    let mut surface = OffscreenSurface::builder(gl.clone(), allocator.clone(), Box::new(updater), Box::new(client))
        .config(config)
        .build()?;

    // The consumer: a separate task that "imports" each buffer and acks the flip.
    let consumer = tokio::spawn(async move {
        let mut imported = 0;
        while let Some(flip) = flips.recv().await {
            if let Some(buffer) = flip.handle.buffer() {
                log::info!("consumer imported buffer {} ({})", buffer.id, buffer.size);
                imported += 1;
            }
            log::debug!("consumer presenting {:?}, damage {:?}", flip.token(), flip.damage);
            flip.ack();
        }
        imported
    });

    let listener = tokio::spawn(async move {
        let mut swaps = 0;
        while let Ok(event) = events.recv().await {
            if let SurfaceEvent::SwapWithSize(size) = event {
                log::debug!("compositor notified of swap at {size}");
                swaps += 1;
            }
        }
        swaps
    });

    let ticks = Rc::new(Cell::new(0u64));
    let counter = ticks.clone();
    surface.set_gpu_vsync_callback(Some(Box::new(move |_, _| counter.set(counter.get() + 1))));

    surface.reshape(ReshapeParams::new(Size::new(1280, 720), ColorSpace::Srgb));

    for frame in 0..FRAMES {
        if frame == RESIZE_AT {
            surface.reshape(ReshapeParams::new(Size::new(1920, 1080), ColorSpace::DisplayP3));
        }

        surface.bind_framebuffer()?;
        surface.swap_buffers(OutputSurfaceFrame::new(surface.size(), vec![LatencyInfo::new(frame)]));

        // Nothing is rendered, so the GPU is done right away.
        gl.resolve_sync_tokens();

        // Wait for the frame to be consumed and for the next vsync before drawing again.
        let next_tick = ticks.get() + 1;
        while surface.pending_swaps() > 0 || ticks.get() < next_tick {
            match tokio::time::timeout(TASK_TIMEOUT, surface.process_next_task()).await {
                Ok(true) => {}
                Ok(false) => anyhow::bail!("render task queue closed"),
                Err(_) => anyhow::bail!("no render task within {TASK_TIMEOUT:?}"),
            }
        }
    }

    drop(surface);

    let imported = consumer.await?;
    let swaps = listener.await?;
    println!("rendered {FRAMES} frames over {} vsync ticks", ticks.get());
    println!(
        "consumer imported {imported} buffers, {swaps} swaps reported, {} allocations",
        allocator.allocations().len(),
    );
    Ok(())
}
