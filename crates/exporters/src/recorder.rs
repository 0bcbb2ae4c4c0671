use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use media_io::ffmpeg_binary;
use parking_lot::Mutex;

use crate::{ExportError, Recorder, RecorderFactory, RecordingSpec};

const CHUNK_SIZE: usize = 64 * 1024;
const WEBM_MIME: &str = "video/webm";

/// Video encoders tried in order; the first one ffmpeg lists wins.
const VIDEO_ENCODERS: [&str; 2] = ["libvpx-vp9", "libvpx"];

fn detect_encoder(ffmpeg: &Path) -> Option<&'static str> {
    let out = Command::new(ffmpeg)
        .arg("-hide_banner")
        .arg("-encoders")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    let listing = String::from_utf8_lossy(&out.stdout);
    VIDEO_ENCODERS.into_iter().find(|enc| listing.contains(enc))
}

/// Records raw RGBA frames plus a WAV soundtrack into WebM (VP9/VP8 + Opus) with ffmpeg.
#[derive(Default)]
pub struct FfmpegRecorderFactory {
    // Resolved once: `Some(None)` means ffmpeg picks its default webm encoder.
    encoder: Mutex<Option<Option<&'static str>>>,
}

impl RecorderFactory for FfmpegRecorderFactory {
    fn create(&self, spec: &RecordingSpec) -> Result<Box<dyn Recorder>, ExportError> {
        let ffmpeg = ffmpeg_binary()?;
        let encoder = *self.encoder.lock().get_or_insert_with(|| detect_encoder(&ffmpeg));
        Ok(Box::new(FfmpegRecorder { ffmpeg, encoder, spec: spec.clone(), running: None }))
    }
}

struct Running {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: JoinHandle<std::io::Result<Vec<Vec<u8>>>>,
}

pub struct FfmpegRecorder {
    ffmpeg: PathBuf,
    encoder: Option<&'static str>,
    spec: RecordingSpec,
    running: Option<Running>,
}

impl FfmpegRecorder {
    fn command(&self) -> Command {
        let s = &self.spec;
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error").arg("-y")
            .arg("-f").arg("rawvideo")
            .arg("-pix_fmt").arg("rgba")
            .arg("-s").arg(format!("{}x{}", s.width, s.height))
            .arg("-r").arg(s.fps.to_string())
            .arg("-i").arg("pipe:0")
            .arg("-i").arg(&s.audio_path)
            .arg("-map").arg("0:v")
            .arg("-map").arg("1:a");
        if let Some(enc) = self.encoder {
            cmd.arg("-c:v").arg(enc);
            if enc == "libvpx-vp9" {
                cmd.arg("-deadline").arg("realtime").arg("-row-mt").arg("1");
            }
        }
        cmd.arg("-b:v").arg(s.video_bitrate.to_string())
            .arg("-pix_fmt").arg("yuv420p")
            .arg("-c:a").arg("libopus")
            .arg("-b:a").arg(s.audio_bitrate.to_string())
            .arg("-f").arg("webm")
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        cmd
    }
}

impl Recorder for FfmpegRecorder {
    fn start(&mut self) -> Result<(), ExportError> {
        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("spawning {}", self.ffmpeg.display()))
            .map_err(|e| ExportError::Recorder(format!("{e:#}")))?;
        let stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExportError::Recorder("ffmpeg stdout unavailable".into()))?;
        let reader = thread::Builder::new().name("recorder-output".into()).spawn(move || {
            let mut chunks = Vec::new();
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match stdout.read(&mut buf)? {
                    0 => break,
                    n => chunks.push(buf[..n].to_vec()),
                }
            }
            Ok(chunks)
        })?;
        tracing::debug!(encoder = ?self.encoder, width = self.spec.width, height = self.spec.height, fps = self.spec.fps, "recorder started");
        self.running = Some(Running { child, stdin, reader });
        Ok(())
    }

    fn push_frame(&mut self, rgba: &[u8]) -> Result<(), ExportError> {
        let stdin = self
            .running
            .as_mut()
            .and_then(|r| r.stdin.as_mut())
            .ok_or_else(|| ExportError::Recorder("recorder not started".into()))?;
        stdin.write_all(rgba).map_err(|e| ExportError::Recorder(format!("encoder input closed: {e}")))
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<Vec<u8>>, ExportError> {
        let mut running = self.running.take().ok_or_else(|| ExportError::Recorder("recorder not started".into()))?;
        drop(running.stdin.take());
        let status = running.child.wait()?;
        let chunks = running
            .reader
            .join()
            .map_err(|_| ExportError::Recorder("output reader panicked".into()))??;
        if !status.success() {
            return Err(ExportError::Recorder(format!("ffmpeg exited with {:?}", status.code())));
        }
        Ok(chunks)
    }

    fn abort(&mut self) {
        if let Some(mut running) = self.running.take() {
            drop(running.stdin.take());
            let _ = running.child.kill();
            let _ = running.child.wait();
            let _ = running.reader.join();
            tracing::debug!("recorder aborted");
        }
    }

    fn mime_type(&self) -> &str { WEBM_MIME }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) { self.abort(); }
}
