use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_VIDEO_BITRATE: u64 = 5_000_000;
pub const DEFAULT_AUDIO_BITRATE: u64 = 128_000;
pub const DEFAULT_GRACE_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub fps: u32,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    /// Wait between stopping the sources and stopping the recorder, so the tail gets flushed.
    pub grace_delay_ms: u64,
    pub file_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            video_bitrate: DEFAULT_VIDEO_BITRATE,
            audio_bitrate: DEFAULT_AUDIO_BITRATE,
            grace_delay_ms: DEFAULT_GRACE_DELAY_MS,
            file_prefix: "documentary-export".into(),
        }
    }
}

impl ExportConfig {
    pub fn fps(&self) -> u32 { self.fps.max(1) }

    pub fn grace_delay(&self) -> Duration { Duration::from_millis(self.grace_delay_ms) }

    /// `<prefix>-<unix millis>.webm`
    pub fn file_name(&self, at: DateTime<Utc>) -> String {
        format!("{}-{}.webm", self.file_prefix, at.timestamp_millis())
    }
}
