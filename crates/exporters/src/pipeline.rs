//! The export pipeline: decode every clip, mix, then record the source video and the mix
//! into one WebM in real time.
//!
//! ```text
//! validate -> load video -> decode clips (0-20%) -> mix -> protect clipping
//!   -> export duration -> capture setup -> render loop (20-95%) -> finalize (100%)
//! ```
//!
//! Every stage checks the cancel flag first. Whatever was acquired is released by
//! [`Resources`] on drop, so failure, cancellation and success share one cleanup path.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use media_io::{write_wav, PcmBuffer};
use tempfile::NamedTempFile;
use timeline::{Clip, MediaRef, Seconds, SharedTimeline, Timeline};

use crate::mixdown::{mix_placed, protect_clipping, PlacedAudio};
use crate::{Canvas, ExportArtifact, ExportConfig, ExportError, ExportServices, Recorder, RecordingSpec, VideoSource};

pub const DECODE_PROGRESS_END: f32 = 20.0;
pub const RENDER_PROGRESS_SPAN: f32 = 75.0;
pub const RENDER_PROGRESS_CAP: f32 = 95.0;

/// Snapshot taken at validation time.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub video: MediaRef,
    pub clips: Vec<Clip>,
    pub timeline_duration: Seconds,
}

/// Checks the preconditions without allocating anything.
pub fn validate(timeline: &Timeline, video: Option<&MediaRef>) -> Result<ExportRequest, ExportError> {
    let video = video.ok_or(ExportError::NoVideoSelected)?;
    let clips: Vec<Clip> = timeline.clips().iter().filter(|c| c.kind.is_audible()).cloned().collect();
    if clips.is_empty() {
        return Err(ExportError::NoPlayableAudio);
    }
    Ok(ExportRequest { video: video.clone(), clips, timeline_duration: timeline.total_duration() })
}

/// Monotonic progress reporter.
struct Progress<'a> {
    last: f32,
    report: &'a mut dyn FnMut(f32),
}

impl Progress<'_> {
    fn set(&mut self, value: f32) {
        let value = value.clamp(0.0, 100.0);
        if value > self.last {
            self.last = value;
            (self.report)(value);
        }
    }
}

#[derive(Default)]
struct Resources {
    decoded: Vec<PlacedAudio>,
    video: Option<Box<dyn VideoSource>>,
    audio_file: Option<NamedTempFile>,
    recorder: Option<Box<dyn Recorder>>,
}

impl Drop for Resources {
    // Released in reverse order of acquisition.
    fn drop(&mut self) {
        if let Some(mut recorder) = self.recorder.take() { recorder.abort(); }
        if let Some(file) = self.audio_file.take() {
            if let Err(err) = file.close() { tracing::warn!(error = %err, "could not remove temporary mix"); }
        }
        if let Some(mut video) = self.video.take() {
            video.pause();
            video.close();
        }
        self.decoded.clear();
        tracing::trace!("export resources released");
    }
}

pub struct ExportPipeline {
    timeline: SharedTimeline,
    services: ExportServices,
    config: ExportConfig,
}

impl ExportPipeline {
    pub fn new(timeline: SharedTimeline, services: ExportServices, config: ExportConfig) -> Self {
        Self { timeline, services, config }
    }

    pub fn run(
        &self,
        request: ExportRequest,
        cancel: &AtomicBool,
        report: &mut dyn FnMut(f32),
    ) -> Result<ExportArtifact, ExportError> {
        let check = || if cancel.load(Ordering::SeqCst) { Err(ExportError::Cancelled) } else { Ok(()) };
        let mut progress = Progress { last: 0.0, report };
        let mut res = Resources::default();
        let fps = self.config.fps();
        tracing::info!(clips = request.clips.len(), fps, "export started");

        // Load video
        check()?;
        let video = self.services.video.open(&request.video).map_err(|e| ExportError::VideoLoad(e.to_string()))?;
        let info = video.info().clone();
        res.video = Some(video);
        tracing::debug!(width = info.width, height = info.height, duration = info.duration, "video loaded");

        // Decode clip audio
        let total = request.clips.len();
        for (i, clip) in request.clips.iter().enumerate() {
            check()?;
            let decoded = self.services.decoder.decode(&clip.media);
            // a cancel that landed during decode discards the result
            check()?;
            if !self.timeline.read().contains(&clip.id) {
                tracing::debug!(clip = %clip.id, "clip removed while decoding; result dropped");
            } else {
                match decoded {
                    Ok(pcm) => res.decoded.push(PlacedAudio {
                        clip_id: clip.id.clone(),
                        track_index: clip.track_index,
                        start_time: clip.start_time,
                        duration: clip.duration,
                        gain: 1.0,
                        pcm,
                    }),
                    Err(err) => tracing::warn!(clip = %clip.id, error = %err, "skipping clip that failed to decode"),
                }
            }
            progress.set((i + 1) as f32 / total as f32 * DECODE_PROGRESS_END);
        }
        if res.decoded.is_empty() {
            return Err(ExportError::NoAudioDecoded);
        }

        // Mix and protect
        check()?;
        {
            let tl = self.timeline.read();
            for p in res.decoded.iter_mut() { p.gain = tl.effective_gain(p.track_index); }
        }
        let mut mixed = mix_placed(&res.decoded).ok_or(ExportError::NoAudioDecoded)?;
        res.decoded.clear();
        let scale = protect_clipping(&mut mixed);
        tracing::debug!(frames = mixed.frames(), rate = mixed.sample_rate(), ?scale, "audio mixed");

        let duration = info.duration.min(request.timeline_duration);
        if duration.is_nan() || duration <= 0.0 {
            return Err(ExportError::VideoLoad("video has no playable duration".into()));
        }
        let looping = mixed.duration() > info.duration;

        // Capture setup
        check()?;
        let soundtrack = fit_to_length(&mixed, mixed.frame_at(duration));
        drop(mixed);
        let audio_file = tempfile::Builder::new().prefix("export-mix-").suffix(".wav").tempfile()?;
        write_wav(audio_file.path(), &soundtrack)?;
        drop(soundtrack);
        let spec = RecordingSpec {
            width: info.width,
            height: info.height,
            fps,
            video_bitrate: self.config.video_bitrate,
            audio_bitrate: self.config.audio_bitrate,
            audio_path: audio_file.path().to_path_buf(),
        };
        res.audio_file = Some(audio_file);
        let mut canvas = Canvas::new(info.width, info.height);
        res.recorder = Some(self.services.recorder.create(&spec)?);

        // Render loop
        check()?;
        let (Some(video), Some(recorder)) = (res.video.as_mut(), res.recorder.as_mut()) else {
            return Err(ExportError::Recorder("capture pipeline incomplete".into()));
        };
        recorder.start()?;
        video.start(fps, looping).map_err(|e| ExportError::VideoLoad(e.to_string()))?;
        progress.set(DECODE_PROGRESS_END);

        let fps_f = fps as f64;
        let total_frames = (duration * fps_f).ceil() as u64;
        let mut captured = 0u64;
        let mut clock = self.services.scheduler.start(fps);
        loop {
            check()?;
            let elapsed = clock.next_frame().as_secs_f64();
            let due = if elapsed >= duration { total_frames } else { ((elapsed * fps_f).floor() as u64).min(total_frames) };
            while captured < due {
                if let Some(frame) = video.frame_at(captured as f64 / fps_f)? {
                    canvas.draw(frame);
                }
                recorder.push_frame(canvas.pixels())?;
                captured += 1;
            }
            progress.set((DECODE_PROGRESS_END + (elapsed / duration) as f32 * RENDER_PROGRESS_SPAN).min(RENDER_PROGRESS_CAP));
            if elapsed >= duration { break; }
        }
        video.pause();
        clock.wait(self.config.grace_delay());

        // Finalize
        check()?;
        let Some(recorder) = res.recorder.take() else {
            return Err(ExportError::Recorder("recorder missing".into()));
        };
        let mime = recorder.mime_type().to_string();
        let blob = recorder.finish()?.concat();
        check()?;
        let file_name = self.config.file_name(Utc::now());
        let artifact = self.services.sink.deliver(&file_name, &mime, &blob)?;
        progress.set(100.0);
        tracing::info!(file = %artifact.file_name, bytes = artifact.size, frames = captured, "export finished");
        Ok(artifact)
    }
}

/// Trims or silence-pads a buffer to exactly `frames`.
fn fit_to_length(buffer: &PcmBuffer, frames: usize) -> PcmBuffer {
    let channels = (0..buffer.channel_count())
        .map(|c| {
            let mut ch = buffer.channel(c).to_vec();
            ch.resize(frames, 0.0);
            ch
        })
        .collect();
    PcmBuffer::from_planar(buffer.sample_rate(), channels)
}

#[cfg(test)]
mod tests {
    use timeline::{ClipDraft, ClipKind};

    use super::*;

    #[test]
    fn validation_needs_a_video() {
        let mut tl = Timeline::new();
        tl.add_clip(ClipDraft::new("a", ClipKind::Audio, MediaRef::file("a.wav"), 2.0)).unwrap();
        assert!(matches!(validate(&tl, None), Err(ExportError::NoVideoSelected)));
    }

    #[test]
    fn validation_needs_audible_clips() {
        let mut tl = Timeline::new();
        tl.add_clip(ClipDraft::new("v", ClipKind::Video { has_audio: false }, MediaRef::file("v.mp4"), 2.0)).unwrap();
        let err = validate(&tl, Some(&MediaRef::file("src.mp4"))).unwrap_err();
        assert!(matches!(err, ExportError::NoPlayableAudio));
    }

    #[test]
    fn request_snapshots_audible_clips_and_total() {
        let mut tl = Timeline::new();
        tl.add_clip(ClipDraft::new("a", ClipKind::Audio, MediaRef::file("a.wav"), 2.0)).unwrap();
        tl.add_clip(ClipDraft::new("v", ClipKind::Video { has_audio: false }, MediaRef::file("v.mp4"), 5.0).on_track(1)).unwrap();
        let req = validate(&tl, Some(&MediaRef::file("src.mp4"))).unwrap();
        assert_eq!(req.clips.len(), 1);
        assert_eq!(req.timeline_duration, 5.0);
    }

    #[test]
    fn fit_pads_and_trims() {
        let buf = PcmBuffer::from_planar(10, vec![vec![0.5; 4]]);
        assert_eq!(fit_to_length(&buf, 6).channel(0), &[0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(fit_to_length(&buf, 2).frames(), 2);
    }

    #[test]
    fn progress_never_goes_backwards() {
        let mut seen = Vec::new();
        let mut push = |p: f32| seen.push(p);
        let mut progress = Progress { last: 0.0, report: &mut push };
        progress.set(10.0);
        progress.set(5.0);
        progress.set(120.0);
        drop(progress);
        assert_eq!(seen, vec![10.0, 100.0]);
    }
}
