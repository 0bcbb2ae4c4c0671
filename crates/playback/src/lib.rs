//! Transport clock, multi-track playback engine and video preview synchronization.
//!
//! The engine polls: every tick it reads the shared timeline and the transport clock, then
//! creates, resynchronizes or releases one player per audible clip so that exactly the clips
//! whose window contains the current time are sounding.

use thiserror::Error;
use timeline::{ClipId, TimelineError};

mod clock;
mod config;
mod driver;
mod engine;
mod source;
mod video_sync;

#[cfg(feature = "cpal-output")]
mod cpal_output;

pub use clock::{ClockTick, EndBehavior, ManualTimeSource, SystemTimeSource, TimeSource, TransportClock};
pub use config::PlaybackConfig;
pub use driver::PlaybackDriver;
pub use engine::{InstanceKey, PlaybackEngine, PlaybackEvent, PlaybackStatus};
pub use source::{ClipPlayer, PlayerFactory};
pub use video_sync::{VideoSurface, VideoSynchronizer};

#[cfg(feature = "cpal-output")]
pub use cpal_output::{CpalOutput, CpalPlayer, CpalPlayerFactory};

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("cannot create player for clip {clip}: {reason}")]
    PlayerCreate { clip: ClipId, reason: String },
    #[error("player rejected seek: {0}")]
    Seek(String),
    #[error("player rejected play: {0}")]
    Play(String),
    #[error("audio output unavailable: {0}")]
    Output(String),
    #[error("video surface rejected play: {0}")]
    Surface(String),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error(transparent)]
    Media(#[from] media_io::MediaError),
}
