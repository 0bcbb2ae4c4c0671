use std::fs;
use std::path::PathBuf;

use media_io::{probe_video, FfmpegFrameReader, MediaError, RgbaFrame, VideoInfo};
use timeline::{MediaRef, Seconds};

use crate::{DownloadSink, ExportArtifact, ExportError, VideoOpener, VideoSource};

/// Opens videos through ffprobe and decodes them through an ffmpeg rawvideo pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegVideoOpener;

impl VideoOpener for FfmpegVideoOpener {
    fn open(&self, media: &MediaRef) -> Result<Box<dyn VideoSource>, MediaError> {
        let info = probe_video(media)?;
        if info.width == 0 || info.height == 0 {
            return Err(MediaError::NoVideoStream);
        }
        Ok(Box::new(FfmpegVideoSource { media: media.clone(), info, reader: None }))
    }
}

struct FfmpegVideoSource {
    media: MediaRef,
    info: VideoInfo,
    reader: Option<FfmpegFrameReader>,
}

impl VideoSource for FfmpegVideoSource {
    fn info(&self) -> &VideoInfo { &self.info }

    fn start(&mut self, fps: u32, looping: bool) -> Result<(), MediaError> {
        self.reader = Some(FfmpegFrameReader::open(&self.media, self.info.clone(), fps.max(1) as f64, looping)?);
        Ok(())
    }

    fn frame_at(&mut self, t: Seconds) -> Result<Option<&RgbaFrame>, MediaError> {
        match self.reader.as_mut() {
            Some(reader) => reader.frame_at(t),
            None => Ok(None),
        }
    }

    // The pipe keeps its place; nothing to do until it is dropped.
    fn pause(&mut self) {}

    fn close(&mut self) { self.reader = None; }
}

/// Writes finished exports into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }
}

impl DownloadSink for DirectorySink {
    fn deliver(&self, file_name: &str, mime: &str, blob: &[u8]) -> Result<ExportArtifact, ExportError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        fs::write(&path, blob)?;
        tracing::info!(path = %path.display(), bytes = blob.len(), "export written");
        Ok(ExportArtifact { file_name: file_name.to_string(), path, mime: mime.to_string(), size: blob.len() as u64 })
    }
}
