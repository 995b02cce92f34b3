//! Cross-thread vsync delivery.
//!
//! A [`VSyncSource`] produces hardware vsync ticks on its own background thread
//! and hands them to every registered [`VSyncObserver`]. The [`VSyncBridge`]
//! registers a relay observer that never runs user code on that thread: it
//! posts the `(timebase, interval)` pair onto the render-thread task queue, in
//! the order the ticks were produced. The surface later takes each tick off the
//! queue and invokes its callback, if one is still registered.

use crate::task::{RenderTask, TaskSender};
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A vsync source that is ticked by the host.
pub mod manual;
/// A timer-driven vsync source running its own thread.
pub mod timer;

pub use manual::ManualVSyncSource;
pub use timer::TimerVSyncSource;

/// Callback invoked on the render thread for every vsync tick.
pub type GpuVSyncCallback = Box<dyn FnMut(Instant, Duration)>;

/// Identifies a registration with a [`VSyncSource`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ObserverId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives vsync ticks. Called on the vsync thread.
pub trait VSyncObserver: Send + Sync {
    fn on_vsync(&self, timebase: Instant, interval: Duration);
}

/// Process-wide source of vsync ticks.
pub trait VSyncSource: Send + Sync {
    /// Registers `observer` under `id`. Registering the same id twice replaces the observer.
    fn add_observer(&self, id: ObserverId, observer: Arc<dyn VSyncObserver>);

    /// Removes the registration. Unknown ids are ignored.
    fn remove_observer(&self, id: ObserverId);
}

/// Relay registered with the vsync source. Runs on the vsync thread.
struct VSyncRelay {
    sender: TaskSender,
}

impl VSyncObserver for VSyncRelay {
    fn on_vsync(&self, timebase: Instant, interval: Duration) {
        if self.sender.is_revoked() {
            return;
        }
        if !self.sender.post(RenderTask::VSync { timebase, interval }) {
            log::trace!("vsync tick dropped, render thread is gone");
        }
    }
}

/// Connects one surface to a [`VSyncSource`].
pub struct VSyncBridge {
    source: Arc<dyn VSyncSource>,
    id: ObserverId,
    relay: Arc<VSyncRelay>,
}

impl Debug for VSyncBridge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VSyncBridge").field("id", &self.id).finish_non_exhaustive()
    }
}

impl VSyncBridge {
    pub(crate) fn new(source: Arc<dyn VSyncSource>, sender: TaskSender) -> Self {
        Self {
            source,
            id: ObserverId::new(),
            relay: Arc::new(VSyncRelay { sender }),
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Registers the relay with the source. Callers make sure this happens once.
    pub fn subscribe(&self) {
        log::debug!("vsync bridge {} subscribing", self.id);
        self.source.add_observer(self.id, self.relay.clone());
    }

    /// Removes the relay from the source. Safe to call when never subscribed.
    pub fn unsubscribe(&self) {
        log::debug!("vsync bridge {} unsubscribing", self.id);
        self.source.remove_observer(self.id);
    }
}
