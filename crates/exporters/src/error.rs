use media_io::MediaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no video file selected")]
    NoVideoSelected,
    #[error("no audio clips with audio to export")]
    NoPlayableAudio,
    #[error("failed to load video: {0}")]
    VideoLoad(String),
    #[error("no audio could be decoded")]
    NoAudioDecoded,
    #[error("recorder failed: {0}")]
    Recorder(String),
    #[error("failed to deliver export: {0}")]
    Delivery(String),
    #[error("export cancelled")]
    Cancelled,
    #[error("an export is already running")]
    AlreadyRunning,
    #[error("export worker stopped unexpectedly")]
    WorkerLost,
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    pub fn is_cancelled(&self) -> bool { matches!(self, ExportError::Cancelled) }
}
