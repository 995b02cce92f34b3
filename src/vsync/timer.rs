//! Timer driven vsync source.
//!
//! Emulates a hardware vsync thread: a single background thread wakes up once
//! per interval and notifies every observer. The thread only exists while at
//! least one observer is registered. [`TimerVSyncSource::global`] returns the
//! process-wide instance ticking at 60 Hz.

use crate::config::DEFAULT_VSYNC_INTERVAL;
use crate::vsync::{ObserverId, VSyncObserver, VSyncSource};
use anyhow::Context;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

lazy_static! {
    static ref GLOBAL_VSYNC: Arc<TimerVSyncSource> = Arc::new(TimerVSyncSource::new(DEFAULT_VSYNC_INTERVAL));
}

type ObserverMap = HashMap<ObserverId, Arc<dyn VSyncObserver>>;

#[derive(Default)]
struct TimerState {
    observers: ObserverMap,
    /// Stop flag of the running thread, if any. Each thread gets its own flag so
    /// a thread that is winding down never races with its replacement.
    running: Option<Arc<AtomicBool>>,
}

pub struct TimerVSyncSource {
    interval: Duration,
    state: Arc<Mutex<TimerState>>,
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TimerVSyncSource {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    /// The process-wide 60 Hz source.
    pub fn global() -> Arc<TimerVSyncSource> {
        GLOBAL_VSYNC.clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.state).observers.len()
    }

    /// Is the tick thread currently running?
    pub fn is_running(&self) -> bool {
        lock(&self.state).running.is_some()
    }

    fn spawn_thread(&self, stop: Arc<AtomicBool>) -> anyhow::Result<()> {
        let state = self.state.clone();
        let interval = self.interval;

        std::thread::Builder::new()
            .name("vsync".into())
            .spawn(move || run_ticks(state, interval, stop))
            .context("failed to spawn vsync thread")?;
        Ok(())
    }
}

fn run_ticks(state: Arc<Mutex<TimerState>>, interval: Duration, stop: Arc<AtomicBool>) {
    log::debug!("vsync thread started ({:?} interval)", interval);
    let mut next = Instant::now() + interval;

    loop {
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        }
        if stop.load(Ordering::Acquire) {
            break;
        }

        let timebase = next;
        let observers: Vec<_> = lock(&state).observers.values().cloned().collect();
        for observer in observers {
            observer.on_vsync(timebase, interval);
        }

        next += interval;
        let now = Instant::now();
        if next <= now {
            // Fell behind; skip the missed ticks instead of delivering a burst.
            let missed = (now - next).as_nanos() / interval.as_nanos().max(1) + 1;
            next += interval * missed as u32;
        }
    }
    log::debug!("vsync thread stopped");
}

impl VSyncSource for TimerVSyncSource {
    fn add_observer(&self, id: ObserverId, observer: Arc<dyn VSyncObserver>) {
        let mut state = lock(&self.state);
        state.observers.insert(id, observer);

        if state.running.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        match self.spawn_thread(stop.clone()) {
            Ok(()) => state.running = Some(stop),
            Err(e) => log::error!("{e:#}"),
        }
    }

    fn remove_observer(&self, id: ObserverId) {
        let mut state = lock(&self.state);
        state.observers.remove(&id);

        if state.observers.is_empty() {
            if let Some(stop) = state.running.take() {
                stop.store(true, Ordering::Release);
            }
        }
    }
}

impl Drop for TimerVSyncSource {
    fn drop(&mut self) {
        if let Some(stop) = lock(&self.state).running.take() {
            stop.store(true, Ordering::Release);
        }
    }
}
