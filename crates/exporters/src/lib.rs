//! Export/mux pipeline: mixes every audible clip on the timeline and records it together with
//! a source video into a single WebM file.
//!
//! [`ExportController`] is the entry point. It validates the request, runs [`ExportPipeline`]
//! on its own thread and publishes [`ExportStatus`] plus [`ExportEvent`]s. The pipeline only
//! talks to the outside world through [`ExportServices`], so every collaborator can be swapped.

mod canvas;
mod config;
mod controller;
mod error;
pub mod mixdown;
mod native;
mod pipeline;
mod recorder;
mod services;

pub use canvas::Canvas;
pub use config::ExportConfig;
pub use controller::{ExportController, ExportEvent, ExportHandle, ExportStatus};
pub use error::ExportError;
pub use mixdown::{concat_contiguous, mix_placed, mixdown_only, protect_clipping, Mixdown, PlacedAudio};
pub use native::{DirectorySink, FfmpegVideoOpener};
pub use pipeline::{validate, ExportPipeline, ExportRequest};
pub use recorder::{FfmpegRecorder, FfmpegRecorderFactory};
pub use services::{
    DownloadSink, ExportArtifact, ExportServices, FrameClock, FrameScheduler, RealtimeScheduler, Recorder,
    RecorderFactory, RecordingSpec, VideoOpener, VideoSource,
};
