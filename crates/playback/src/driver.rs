use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::PlaybackEngine;

/// Background thread that ticks the engine at a fixed interval while it plays.
pub struct PlaybackDriver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackDriver {
    pub fn spawn(engine: Arc<Mutex<PlaybackEngine>>) -> std::io::Result<Self> {
        let interval = engine.lock().config().tick_interval();
        Self::spawn_with_interval(engine, interval)
    }

    pub fn spawn_with_interval(engine: Arc<Mutex<PlaybackEngine>>, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_c = stop.clone();
        let handle = thread::Builder::new().name("playback-tick".into()).spawn(move || {
            tracing::debug!(interval_ms = interval.as_millis() as u64, "tick driver started");
            while !stop_c.load(Ordering::Relaxed) {
                {
                    let mut engine = engine.lock();
                    if engine.is_playing() { engine.tick(); }
                }
                thread::sleep(interval);
            }
            tracing::debug!("tick driver stopped");
        })?;
        Ok(Self { stop, handle: Some(handle) })
    }

    pub fn stop(mut self) { self.shutdown(); }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() { let _ = h.join(); }
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) { self.shutdown(); }
}
