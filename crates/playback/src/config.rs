use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::EndBehavior;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;
pub const DEFAULT_DRIFT_TOLERANCE: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Reconciliation period of the tick driver.
    pub tick_interval_ms: u64,
    /// Seconds a player may wander from the transport before it is reseeked.
    pub drift_tolerance: f64,
    /// Same, for the video preview surface.
    pub video_drift_tolerance: f64,
    pub end_behavior: EndBehavior,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
            video_drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
            end_behavior: EndBehavior::ResetToStart,
        }
    }
}

impl PlaybackConfig {
    pub fn tick_interval(&self) -> Duration { Duration::from_millis(self.tick_interval_ms.max(1)) }
}
