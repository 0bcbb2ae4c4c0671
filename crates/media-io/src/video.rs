use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::Context;
use timeline::MediaRef;

use crate::{ffmpeg_binary, MediaError, SpooledMedia, VideoInfo};

/// One decoded picture, tightly packed RGBA8.
#[derive(Debug, Clone)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pts: f64,
    pub data: Vec<u8>,
}

impl RgbaFrame {
    pub fn black(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; width as usize * height as usize * 4];
        for px in data.chunks_exact_mut(4) { px[3] = 255; }
        Self { width, height, pts: 0.0, data }
    }

    pub fn byte_len(width: u32, height: u32) -> usize { width as usize * height as usize * 4 }
}

/// Sequential frame reader over an ffmpeg rawvideo pipe at a fixed frame rate.
/// Frames are only read forward; asking for an earlier time returns the last frame.
pub struct FfmpegFrameReader {
    child: Child,
    stdout: ChildStdout,
    info: VideoInfo,
    fps: f64,
    next_index: u64,
    current: Option<RgbaFrame>,
    ended: bool,
    _input: SpooledMedia,
}

impl FfmpegFrameReader {
    /// Spawns the decoder. With `looping` the source restarts from zero when it runs out.
    pub fn open(media: &MediaRef, info: VideoInfo, fps: f64, looping: bool) -> Result<Self, MediaError> {
        if info.width == 0 || info.height == 0 {
            return Err(MediaError::NoVideoStream);
        }
        let ffmpeg = ffmpeg_binary()?;
        let input = SpooledMedia::new(media)?;
        let mut cmd = Command::new(&ffmpeg);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        if looping {
            cmd.arg("-stream_loop").arg("-1");
        }
        cmd.arg("-i").arg(input.path())
            .arg("-an")
            .arg("-vf").arg(format!("fps={fps}"))
            .arg("-f").arg("rawvideo")
            .arg("-pix_fmt").arg("rgba")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().with_context(|| format!("spawning {}", ffmpeg.display()))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("ffmpeg stdout unavailable"))?;
        tracing::debug!(source = %media.cache_key(), width = info.width, height = info.height, fps, looping, "frame reader started");
        Ok(Self { child, stdout, info, fps, next_index: 0, current: None, ended: false, _input: input })
    }

    pub fn info(&self) -> &VideoInfo { &self.info }

    fn read_next(&mut self) -> Result<bool, MediaError> {
        let len = RgbaFrame::byte_len(self.info.width, self.info.height);
        let mut data = vec![0u8; len];
        match self.stdout.read_exact(&mut data) {
            Ok(()) => {
                let pts = self.next_index as f64 / self.fps;
                self.next_index += 1;
                self.current = Some(RgbaFrame { width: self.info.width, height: self.info.height, pts, data });
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.ended = true;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The frame displayed at `t` seconds of source time. Past the end the last frame holds.
    pub fn frame_at(&mut self, t: f64) -> Result<Option<&RgbaFrame>, MediaError> {
        let wanted = (t.max(0.0) * self.fps).floor() as u64;
        while !self.ended && (self.current.is_none() || self.next_index <= wanted) {
            if !self.read_next()? { break; }
        }
        Ok(self.current.as_ref())
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_frame_is_opaque() {
        let f = RgbaFrame::black(2, 2);
        assert_eq!(f.data.len(), 16);
        assert!(f.data.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn zero_sized_video_is_rejected() {
        let info = VideoInfo { width: 0, height: 0, duration: 1.0, frame_rate: None, has_audio: false };
        let err = FfmpegFrameReader::open(&MediaRef::file("x.mp4"), info, 30.0, false).err();
        assert!(matches!(err, Some(MediaError::NoVideoStream)));
    }
}
