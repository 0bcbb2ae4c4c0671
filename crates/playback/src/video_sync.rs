use timeline::Seconds;

use crate::{PlaybackError, PlaybackStatus};

/// A preview surface showing the source video. It only ever follows the transport.
pub trait VideoSurface: Send {
    fn set_position(&mut self, t: Seconds);
    fn position(&self) -> Seconds;
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
}

/// Mirrors `(is_playing, global_time)` into a [`VideoSurface`].
pub struct VideoSynchronizer {
    surface: Box<dyn VideoSurface>,
    enabled: bool,
    tolerance: Seconds,
    last: Option<(bool, Seconds)>,
    surface_playing: bool,
    play_rejected: bool,
}

impl VideoSynchronizer {
    pub fn new(surface: Box<dyn VideoSurface>, tolerance: Seconds) -> Self {
        Self { surface, enabled: true, tolerance, last: None, surface_playing: false, play_rejected: false }
    }

    pub fn is_enabled(&self) -> bool { self.enabled }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.last = None;
            if self.surface_playing {
                self.surface.pause();
                self.surface_playing = false;
            }
        }
    }

    pub fn follow(&mut self, status: &PlaybackStatus) {
        if !self.enabled { return; }
        let current = (status.is_playing, status.global_time);
        if self.last == Some(current) { return; }
        if self.last.map(|(playing, _)| playing) != Some(status.is_playing) {
            self.play_rejected = false;
        }
        self.last = Some(current);

        let drift = (self.surface.position() - status.global_time).abs();
        if !status.is_playing || drift > self.tolerance {
            self.surface.set_position(status.global_time);
        }

        if status.is_playing {
            if !self.surface_playing && !self.play_rejected {
                match self.surface.play() {
                    Ok(()) => self.surface_playing = true,
                    Err(err) => {
                        tracing::warn!(error = %err, "video preview refused to play");
                        self.play_rejected = true;
                    }
                }
            }
        } else if self.surface_playing {
            self.surface.pause();
            self.surface_playing = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Log {
        position: f64,
        seeks: usize,
        play_calls: usize,
        pauses: usize,
        playing: bool,
        reject_play: bool,
    }

    struct Surface(Arc<Mutex<Log>>);

    impl VideoSurface for Surface {
        fn set_position(&mut self, t: Seconds) {
            let mut log = self.0.lock();
            log.position = t;
            log.seeks += 1;
        }
        fn position(&self) -> Seconds { self.0.lock().position }
        fn play(&mut self) -> Result<(), PlaybackError> {
            let mut log = self.0.lock();
            log.play_calls += 1;
            if log.reject_play { return Err(PlaybackError::Surface("autoplay blocked".into())); }
            log.playing = true;
            Ok(())
        }
        fn pause(&mut self) {
            let mut log = self.0.lock();
            log.pauses += 1;
            log.playing = false;
        }
    }

    fn status(is_playing: bool, t: f64) -> PlaybackStatus {
        PlaybackStatus { is_playing, global_time: t, total_duration: 10.0 }
    }

    fn sync() -> (VideoSynchronizer, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        (VideoSynchronizer::new(Box::new(Surface(log.clone())), 0.2), log)
    }

    #[test]
    fn paused_follow_repositions() {
        let (mut s, log) = sync();
        s.follow(&status(false, 4.0));
        assert_eq!(log.lock().position, 4.0);
        assert!(!log.lock().playing);
    }

    #[test]
    fn small_drift_while_playing_is_left_alone() {
        let (mut s, log) = sync();
        s.follow(&status(true, 1.0));
        assert!(log.lock().playing);
        let seeks = log.lock().seeks;
        log.lock().position = 1.1;
        s.follow(&status(true, 1.2));
        assert_eq!(log.lock().seeks, seeks);
        log.lock().position = 1.3;
        s.follow(&status(true, 2.0));
        assert_eq!(log.lock().seeks, seeks + 1);
        assert_eq!(log.lock().position, 2.0);
    }

    #[test]
    fn rejected_play_is_not_retried_until_state_changes() {
        let (mut s, log) = sync();
        log.lock().reject_play = true;
        s.follow(&status(true, 0.1));
        s.follow(&status(true, 0.2));
        s.follow(&status(true, 0.3));
        assert_eq!(log.lock().play_calls, 1);

        log.lock().reject_play = false;
        s.follow(&status(false, 0.3));
        s.follow(&status(true, 0.3));
        assert_eq!(log.lock().play_calls, 2);
        assert!(log.lock().playing);
    }

    #[test]
    fn unchanged_status_is_ignored() {
        let (mut s, log) = sync();
        s.follow(&status(false, 2.0));
        s.follow(&status(false, 2.0));
        assert_eq!(log.lock().seeks, 1);
    }

    #[test]
    fn disabled_synchronizer_does_nothing() {
        let (mut s, log) = sync();
        s.set_enabled(false);
        s.follow(&status(true, 3.0));
        assert_eq!(log.lock().play_calls, 0);
        assert_eq!(log.lock().seeks, 0);
    }
}
