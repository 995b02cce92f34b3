use crate::vsync::{ObserverId, VSyncObserver, VSyncSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Vsync source for hosts that already receive vblank events, e.g. from a
/// display link or a compositor. Call [`tick`](Self::tick) from whatever
/// thread delivers them.
#[derive(Default)]
pub struct ManualVSyncSource {
    observers: Mutex<HashMap<ObserverId, Arc<dyn VSyncObserver>>>,
}

impl ManualVSyncSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<ObserverId, Arc<dyn VSyncObserver>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// Delivers one tick to every registered observer.
    pub fn tick(&self, timebase: Instant, interval: Duration) {
        // Snapshot so observers may (un)register from inside their callback.
        let observers: Vec<_> = self.observers().values().cloned().collect();
        for observer in observers {
            observer.on_vsync(timebase, interval);
        }
    }
}

impl VSyncSource for ManualVSyncSource {
    fn add_observer(&self, id: ObserverId, observer: Arc<dyn VSyncObserver>) {
        self.observers().insert(id, observer);
    }

    fn remove_observer(&self, id: ObserverId) {
        self.observers().remove(&id);
    }
}
