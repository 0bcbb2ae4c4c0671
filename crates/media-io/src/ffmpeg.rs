use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context;
use tempfile::NamedTempFile;
use timeline::MediaRef;

use crate::{encode_wav, MediaError, PcmBuffer};

/// Sample rate handed out for audio extracted from video containers.
pub const EXTRACT_SAMPLE_RATE: u32 = 48_000;
const EXTRACT_CHANNELS: usize = 2;

pub fn ffmpeg_binary() -> Result<PathBuf, MediaError> {
    which::which("ffmpeg").map_err(|_| MediaError::ToolMissing("ffmpeg"))
}

pub fn ffprobe_binary() -> Result<PathBuf, MediaError> {
    which::which("ffprobe").map_err(|_| MediaError::ToolMissing("ffprobe"))
}

/// A filesystem path for a media reference. In-memory media is spooled into a temp file
/// that lives as long as this value.
pub struct SpooledMedia {
    path: PathBuf,
    _spool: Option<NamedTempFile>,
}

impl SpooledMedia {
    pub fn new(media: &MediaRef) -> Result<Self, MediaError> {
        match media {
            MediaRef::File { path } => Ok(Self { path: path.clone(), _spool: None }),
            MediaRef::Memory { bytes, extension } => {
                let suffix = extension.as_deref().map(|e| format!(".{e}")).unwrap_or_default();
                let mut spool = tempfile::Builder::new().prefix("media-").suffix(&suffix).tempfile()?;
                spool.write_all(bytes)?;
                spool.flush()?;
                Ok(Self { path: spool.path().to_path_buf(), _spool: Some(spool) })
            }
        }
    }

    pub fn path(&self) -> &Path { &self.path }
}

/// Audio pulled out of a video container, ready to become an `ExtractedAudio` clip.
#[derive(Debug, Clone)]
pub struct ExtractedAudio {
    pub media: MediaRef,
    pub duration: f64,
}

/// Extracts the soundtrack of `video` as 16-bit stereo WAV held in memory.
pub fn extract_audio(video: &MediaRef) -> Result<ExtractedAudio, MediaError> {
    let ffmpeg = ffmpeg_binary()?;
    let input = SpooledMedia::new(video)?;

    let out = Command::new(&ffmpeg)
        .arg("-hide_banner")
        .arg("-i").arg(input.path())
        .arg("-vn")
        .arg("-ac").arg(EXTRACT_CHANNELS.to_string())
        .arg("-ar").arg(EXTRACT_SAMPLE_RATE.to_string())
        .arg("-f").arg("s16le")
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("spawning {}", ffmpeg.display()))?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("does not contain any stream") || stderr.contains("Output file #0 does not contain") {
            return Err(MediaError::NoAudioTrack);
        }
        return Err(anyhow::anyhow!("ffmpeg audio extraction failed ({:?}): {}", out.status.code(), stderr.trim()).into());
    }
    if out.stdout.is_empty() {
        return Err(MediaError::NoAudioTrack);
    }

    let samples: Vec<f32> = out
        .stdout
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();
    let pcm = PcmBuffer::from_interleaved(&samples, EXTRACT_CHANNELS, EXTRACT_SAMPLE_RATE);
    tracing::debug!(source = %video.cache_key(), duration = pcm.duration(), "extracted audio track");
    Ok(ExtractedAudio { duration: pcm.duration(), media: MediaRef::memory(encode_wav(&pcm), Some("wav")) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_refs_are_not_spooled() {
        let spooled = SpooledMedia::new(&MediaRef::file("/media/clip.mp4")).unwrap();
        assert_eq!(spooled.path(), Path::new("/media/clip.mp4"));
    }

    #[test]
    fn memory_refs_spool_with_extension() {
        let spooled = SpooledMedia::new(&MediaRef::memory(vec![1, 2, 3], Some("webm"))).unwrap();
        let path = spooled.path().to_path_buf();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("webm"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
        drop(spooled);
        assert!(!path.exists());
    }
}
