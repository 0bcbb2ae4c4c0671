//! Media plumbing shared by playback and export: decoded PCM buffers, symphonia decoding,
//! WAV encoding and the ffmpeg/ffprobe subprocess helpers (probe, audio extraction, frame reading).

use thiserror::Error;

mod audio_decode;
mod ffmpeg;
mod pcm;
mod probe;
mod video;
mod wav;

pub use audio_decode::{decode_media, AudioDecoder, SymphoniaDecoder};
pub use ffmpeg::{extract_audio, ffmpeg_binary, ffprobe_binary, ExtractedAudio, SpooledMedia};
pub use pcm::{resample_linear, PcmBuffer};
pub use probe::{probe_video, VideoInfo};
pub use video::{FfmpegFrameReader, RgbaFrame};
pub use wav::{encode_wav, write_wav};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to open media {0}")]
    Open(String),
    #[error("unsupported media format: {0}")]
    UnsupportedFormat(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("no audio track found")]
    NoAudioTrack,
    #[error("no video stream found")]
    NoVideoStream,
    #[error("{0} not found on PATH")]
    ToolMissing(&'static str),
    #[error("probe failed: {0}")]
    Probe(String),
    #[error(transparent)]
    Process(#[from] anyhow::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
