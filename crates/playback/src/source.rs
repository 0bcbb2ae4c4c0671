use timeline::{Clip, Seconds};

use crate::PlaybackError;

/// One playable instance of a clip. Positions are offsets into the clip's own media.
pub trait ClipPlayer: Send {
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn seek(&mut self, offset: Seconds) -> Result<(), PlaybackError>;
    fn position(&self) -> Seconds;
    fn set_volume(&mut self, volume: f32);
    /// True once the media ran out on its own.
    fn is_ended(&self) -> bool;
    /// Releases the underlying resources. The player is not used again.
    fn stop(&mut self);
}

pub trait PlayerFactory: Send {
    fn create(&mut self, clip: &Clip) -> Result<Box<dyn ClipPlayer>, PlaybackError>;
}
