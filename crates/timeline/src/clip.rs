use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Seconds;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn new() -> Self { Self(Uuid::new_v4().to_string()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl Default for ClipId {
    fn default() -> Self { Self::new() }
}

impl From<&str> for ClipId {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

impl From<String> for ClipId {
    fn from(s: String) -> Self { Self(s) }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Decodable media behind a clip. Content is fetched lazily by whoever plays or exports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MediaRef {
    #[serde(rename = "file")]
    File { path: PathBuf },

    #[serde(rename = "memory")]
    Memory { bytes: Arc<Vec<u8>>, extension: Option<String> },
}

impl MediaRef {
    pub fn file(path: impl Into<PathBuf>) -> Self { MediaRef::File { path: path.into() } }

    pub fn memory(bytes: Vec<u8>, extension: Option<&str>) -> Self {
        MediaRef::Memory { bytes: Arc::new(bytes), extension: extension.map(str::to_string) }
    }

    /// File extension used as a container hint by decoders.
    pub fn extension(&self) -> Option<&str> {
        match self {
            MediaRef::File { path } => path.extension().and_then(|e| e.to_str()),
            MediaRef::Memory { extension, .. } => extension.as_deref(),
        }
    }

    /// Stable key for caches: the path for files, the buffer address for memory refs.
    pub fn cache_key(&self) -> String {
        match self {
            MediaRef::File { path } => path.display().to_string(),
            MediaRef::Memory { bytes, .. } => format!("mem:{:p}", Arc::as_ptr(bytes)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClipKind {
    #[serde(rename = "audio")]
    Audio,

    #[serde(rename = "extracted_audio")]
    ExtractedAudio,

    #[serde(rename = "video")]
    Video { has_audio: bool },
}

/// What a clip contributes to playback and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Audio,
    VideoWithAudio,
    Silent,
}

impl ClipKind {
    pub fn role(&self) -> SourceRole {
        match self {
            ClipKind::Audio | ClipKind::ExtractedAudio => SourceRole::Audio,
            ClipKind::Video { has_audio: true } => SourceRole::VideoWithAudio,
            ClipKind::Video { has_audio: false } => SourceRole::Silent,
        }
    }

    pub fn is_audible(&self) -> bool { self.role() != SourceRole::Silent }
}

/// Creation input handed over by the clip-creation collaborators (upload, generation, extraction).
#[derive(Debug, Clone)]
pub struct ClipDraft {
    pub id: ClipId,
    pub name: String,
    pub kind: ClipKind,
    pub media: MediaRef,
    pub duration: Seconds,
    pub track_index: Option<usize>,
    pub start_time: Option<Seconds>,
}

impl ClipDraft {
    pub fn new(name: impl Into<String>, kind: ClipKind, media: MediaRef, duration: Seconds) -> Self {
        Self { id: ClipId::new(), name: name.into(), kind, media, duration, track_index: None, start_time: None }
    }

    pub fn with_id(mut self, id: impl Into<ClipId>) -> Self { self.id = id.into(); self }

    pub fn on_track(mut self, track_index: usize) -> Self { self.track_index = Some(track_index); self }

    pub fn at(mut self, start_time: Seconds) -> Self { self.start_time = Some(start_time); self }
}

/// A fully placed clip. No positional field is optional once a clip reaches the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub name: String,
    #[serde(flatten)]
    pub kind: ClipKind,
    pub media: MediaRef,
    pub duration: Seconds,
    pub track_index: usize,
    pub start_time: Seconds,
    pub track_volume: f32,
}

impl Clip {
    pub fn end_time(&self) -> Seconds { self.start_time + self.duration }

    pub fn is_active_at(&self, t: Seconds) -> bool { crate::window_contains(self.start_time, self.duration, t) }
}
