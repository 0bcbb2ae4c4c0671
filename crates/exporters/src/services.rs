//! Collaborators the export pipeline drives. Native implementations live next to this module;
//! tests substitute counting fakes.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use media_io::{AudioDecoder, MediaError, RgbaFrame, SymphoniaDecoder, VideoInfo};
use serde::{Deserialize, Serialize};
use timeline::{MediaRef, Seconds};

use crate::{DirectorySink, ExportError, FfmpegRecorderFactory, FfmpegVideoOpener};

/// Video source with metadata already loaded. Playback begins with `start`.
pub trait VideoSource: Send {
    fn info(&self) -> &VideoInfo;
    fn start(&mut self, fps: u32, looping: bool) -> Result<(), MediaError>;
    /// Frame shown `t` seconds after `start`.
    fn frame_at(&mut self, t: Seconds) -> Result<Option<&RgbaFrame>, MediaError>;
    fn pause(&mut self);
    fn close(&mut self);
}

pub trait VideoOpener: Send + Sync {
    fn open(&self, media: &MediaRef) -> Result<Box<dyn VideoSource>, MediaError>;
}

/// What the recorder is asked to produce.
#[derive(Debug, Clone)]
pub struct RecordingSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    /// Mixed soundtrack, already trimmed to the export duration.
    pub audio_path: PathBuf,
}

pub trait Recorder: Send {
    fn start(&mut self) -> Result<(), ExportError>;
    /// One tightly packed RGBA frame of `width * height * 4` bytes.
    fn push_frame(&mut self, rgba: &[u8]) -> Result<(), ExportError>;
    /// Stops recording and hands back the encoded chunks in order.
    fn finish(self: Box<Self>) -> Result<Vec<Vec<u8>>, ExportError>;
    fn abort(&mut self);
    fn mime_type(&self) -> &str;
}

pub trait RecorderFactory: Send + Sync {
    fn create(&self, spec: &RecordingSpec) -> Result<Box<dyn Recorder>, ExportError>;
}

/// Paces the render loop against the wall clock.
pub trait FrameScheduler: Send + Sync {
    fn start(&self, fps: u32) -> Box<dyn FrameClock>;
}

pub trait FrameClock: Send {
    /// Waits for the next frame slot and returns the time elapsed since start.
    fn next_frame(&mut self) -> Duration;
    fn wait(&mut self, d: Duration);
}

/// Sleeps until each 1/fps deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealtimeScheduler;

struct RealtimeClock {
    started: Instant,
    frame: Duration,
    next: Duration,
}

impl FrameScheduler for RealtimeScheduler {
    fn start(&self, fps: u32) -> Box<dyn FrameClock> {
        let frame = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        Box::new(RealtimeClock { started: Instant::now(), frame, next: frame })
    }
}

impl FrameClock for RealtimeClock {
    fn next_frame(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if elapsed < self.next { thread::sleep(self.next - elapsed); }
        self.next += self.frame;
        self.started.elapsed()
    }

    fn wait(&mut self, d: Duration) { thread::sleep(d); }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub mime: String,
    pub size: u64,
}

/// Final destination of the exported file.
pub trait DownloadSink: Send + Sync {
    fn deliver(&self, file_name: &str, mime: &str, blob: &[u8]) -> Result<ExportArtifact, ExportError>;
}

/// Everything the pipeline talks to.
#[derive(Clone)]
pub struct ExportServices {
    pub decoder: Arc<dyn AudioDecoder>,
    pub video: Arc<dyn VideoOpener>,
    pub recorder: Arc<dyn RecorderFactory>,
    pub scheduler: Arc<dyn FrameScheduler>,
    pub sink: Arc<dyn DownloadSink>,
}

impl ExportServices {
    /// symphonia decode, ffmpeg video and recorder, real-time pacing, files written into `output_dir`.
    pub fn native(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            decoder: Arc::new(SymphoniaDecoder),
            video: Arc::new(FfmpegVideoOpener),
            recorder: Arc::new(FfmpegRecorderFactory::default()),
            scheduler: Arc::new(RealtimeScheduler),
            sink: Arc::new(DirectorySink::new(output_dir)),
        }
    }
}
