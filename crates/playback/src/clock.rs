use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use timeline::Seconds;

/// Monotonic wall clock, measured from an arbitrary origin.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self { Self { origin: Instant::now() } }
}

impl Default for SystemTimeSource {
    fn default() -> Self { Self::new() }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Duration { self.origin.elapsed() }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    micros: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new() -> Self { Self::default() }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: f64) { self.advance(Duration::from_secs_f64(secs.max(0.0))); }

    pub fn set(&self, at: Duration) { self.micros.store(at.as_micros() as u64, Ordering::SeqCst); }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Duration { Duration::from_micros(self.micros.load(Ordering::SeqCst)) }
}

/// What the transport does when it runs into the end of the timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndBehavior {
    #[default]
    ResetToStart,
    HoldAtEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTick {
    pub position: Seconds,
    pub running: bool,
    /// Set on the one tick that ran into the end.
    pub finished: bool,
}

/// The single virtual playhead. Position is always derived from the wall clock and the
/// anchor taken at the last play/seek, never from a player.
#[derive(Debug, Clone)]
pub struct TransportClock {
    total: Seconds,
    position: Seconds,
    running: bool,
    // Wall-clock seconds at which position 0 would have been.
    anchor: f64,
    end_behavior: EndBehavior,
}

impl TransportClock {
    pub fn new(end_behavior: EndBehavior) -> Self {
        Self { total: 0.0, position: 0.0, running: false, anchor: 0.0, end_behavior }
    }

    pub fn total(&self) -> Seconds { self.total }

    pub fn position(&self) -> Seconds { self.position }

    pub fn is_running(&self) -> bool { self.running }

    pub fn end_behavior(&self) -> EndBehavior { self.end_behavior }

    /// Adopts a new timeline length. The position is clamped; an empty timeline stops the clock.
    pub fn set_total(&mut self, total: Seconds, now: Duration) {
        let total = if total.is_finite() { total.max(0.0) } else { 0.0 };
        self.total = total;
        if total <= 0.0 {
            self.running = false;
            self.position = 0.0;
        } else if self.position > total {
            self.position = total;
            self.anchor = now.as_secs_f64() - self.position;
        }
    }

    /// Starts running from the current position. Refuses (returns false) on an empty timeline.
    pub fn play(&mut self, now: Duration) -> bool {
        if self.total <= 0.0 { return false; }
        if self.running { return true; }
        if self.position >= self.total { self.position = 0.0; }
        self.anchor = now.as_secs_f64() - self.position;
        self.running = true;
        true
    }

    pub fn pause(&mut self, now: Duration) {
        if !self.running { return; }
        self.position = self.compute(now).min(self.total);
        self.running = false;
    }

    pub fn seek(&mut self, t: Seconds, now: Duration) {
        let t = if t.is_finite() { t } else { 0.0 };
        self.position = t.clamp(0.0, self.total);
        self.anchor = now.as_secs_f64() - self.position;
    }

    pub fn reset(&mut self) {
        self.running = false;
        self.position = 0.0;
    }

    pub fn tick(&mut self, now: Duration) -> ClockTick {
        if !self.running {
            return ClockTick { position: self.position, running: false, finished: false };
        }
        let pos = self.compute(now);
        if pos >= self.total {
            self.finish();
            return ClockTick { position: self.position, running: false, finished: true };
        }
        self.position = pos;
        ClockTick { position: pos, running: true, finished: false }
    }

    /// Stops at the end of the timeline and applies the end behavior.
    pub fn finish(&mut self) {
        self.running = false;
        self.position = match self.end_behavior {
            EndBehavior::ResetToStart => 0.0,
            EndBehavior::HoldAtEnd => self.total,
        };
    }

    fn compute(&self, now: Duration) -> Seconds { (now.as_secs_f64() - self.anchor).max(0.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration { Duration::from_secs_f64(s) }

    #[test]
    fn refuses_to_run_when_empty() {
        let mut clock = TransportClock::new(EndBehavior::ResetToStart);
        assert!(!clock.play(secs(0.0)));
        let tick = clock.tick(secs(5.0));
        assert_eq!(tick.position, 0.0);
        assert!(!tick.running);
    }

    #[test]
    fn advances_from_anchor() {
        let mut clock = TransportClock::new(EndBehavior::ResetToStart);
        clock.set_total(10.0, secs(100.0));
        assert!(clock.play(secs(100.0)));
        let tick = clock.tick(secs(102.5));
        assert!((tick.position - 2.5).abs() < 1e-9);
        assert!(tick.running);
    }

    #[test]
    fn pause_freezes_and_play_resumes() {
        let mut clock = TransportClock::new(EndBehavior::ResetToStart);
        clock.set_total(10.0, secs(0.0));
        clock.play(secs(0.0));
        clock.pause(secs(3.0));
        assert_eq!(clock.tick(secs(50.0)).position, 3.0);
        clock.play(secs(50.0));
        assert!((clock.tick(secs(51.0)).position - 4.0).abs() < 1e-9);
    }

    #[test]
    fn seek_clamps_and_reanchors() {
        let mut clock = TransportClock::new(EndBehavior::ResetToStart);
        clock.set_total(10.0, secs(0.0));
        clock.seek(42.0, secs(0.0));
        assert_eq!(clock.position(), 10.0);
        clock.seek(-1.0, secs(0.0));
        assert_eq!(clock.position(), 0.0);
        clock.play(secs(1.0));
        clock.seek(6.0, secs(2.0));
        assert!((clock.tick(secs(3.0)).position - 7.0).abs() < 1e-9);
    }

    #[test]
    fn end_resets_to_start_by_default() {
        let mut clock = TransportClock::new(EndBehavior::default());
        clock.set_total(2.0, secs(0.0));
        clock.play(secs(0.0));
        let tick = clock.tick(secs(2.0));
        assert!(tick.finished);
        assert!(!tick.running);
        assert_eq!(tick.position, 0.0);
    }

    #[test]
    fn end_can_hold() {
        let mut clock = TransportClock::new(EndBehavior::HoldAtEnd);
        clock.set_total(2.0, secs(0.0));
        clock.play(secs(0.0));
        assert_eq!(clock.tick(secs(9.0)).position, 2.0);
        // playing again from the end restarts
        clock.play(secs(9.0));
        assert!((clock.tick(secs(9.5)).position - 0.5).abs() < 1e-9);
    }

    #[test]
    fn finish_applies_end_behavior() {
        let mut hold = TransportClock::new(EndBehavior::HoldAtEnd);
        hold.set_total(4.0, secs(0.0));
        hold.play(secs(0.0));
        hold.finish();
        assert!(!hold.is_running());
        assert_eq!(hold.position(), 4.0);

        let mut reset = TransportClock::new(EndBehavior::ResetToStart);
        reset.set_total(4.0, secs(0.0));
        reset.seek(4.0, secs(0.0));
        reset.finish();
        assert_eq!(reset.position(), 0.0);
    }

    #[test]
    fn shrinking_total_clamps_position() {
        let mut clock = TransportClock::new(EndBehavior::ResetToStart);
        clock.set_total(10.0, secs(0.0));
        clock.seek(8.0, secs(0.0));
        clock.set_total(5.0, secs(0.0));
        assert_eq!(clock.position(), 5.0);
        clock.set_total(0.0, secs(0.0));
        assert_eq!(clock.position(), 0.0);
        assert!(!clock.is_running());
    }

    #[test]
    fn manual_source_is_shared() {
        let a = ManualTimeSource::new();
        let b = a.clone();
        a.advance_secs(1.5);
        assert_eq!(b.now(), Duration::from_millis(1500));
    }
}
