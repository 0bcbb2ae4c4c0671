use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

mod clip;
mod model;

pub use clip::{Clip, ClipDraft, ClipId, ClipKind, MediaRef, SourceRole};
pub use model::{Timeline, TrackState, TrackView};

/// Seconds from the timeline origin.
pub type Seconds = f64;

/// The model shared between the UI (sole writer), the playback engine and the exporter.
pub type SharedTimeline = Arc<RwLock<Timeline>>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimelineError {
    #[error("clip {0} has no resolved duration")]
    UnresolvedDuration(ClipId),
    #[error("clip {0} is already on the timeline")]
    DuplicateClip(ClipId),
    #[error("clip {0} not found")]
    ClipNotFound(ClipId),
    #[error("track {0} is locked")]
    TrackLocked(usize),
}

/// Half-open activity window: `[start, start + duration)`.
pub fn window_contains(start: Seconds, duration: Seconds, t: Seconds) -> bool {
    t >= start && t < start + duration
}
