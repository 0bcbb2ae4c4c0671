use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use timeline::{Clip, ClipId, Seconds, SharedTimeline};

use crate::{
    ClipPlayer, PlaybackConfig, PlaybackError, PlayerFactory, TimeSource, TransportClock, VideoSurface,
    VideoSynchronizer,
};

/// Identity of one playing instance. A clip moved to another track gets a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub track_index: usize,
    pub clip_id: ClipId,
}

impl InstanceKey {
    fn of(clip: &Clip) -> Self { Self { track_index: clip.track_index, clip_id: clip.id.clone() } }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub is_playing: bool,
    pub global_time: Seconds,
    pub total_duration: Seconds,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Tick(PlaybackStatus),
    StateChanged(PlaybackStatus),
    /// The transport ran into the end of the timeline.
    Completed,
}

struct ActiveInstance {
    player: Box<dyn ClipPlayer>,
    start_time: Seconds,
}

struct Wanted {
    key: InstanceKey,
    clip: Clip,
    gain: f32,
}

pub struct PlaybackEngine {
    timeline: SharedTimeline,
    time: Arc<dyn TimeSource>,
    factory: Box<dyn PlayerFactory>,
    config: PlaybackConfig,
    clock: TransportClock,
    instances: HashMap<InstanceKey, ActiveInstance>,
    // Instances whose media ended before their window did; not recreated until the next seek.
    exhausted: HashSet<InstanceKey>,
    failed: HashSet<InstanceKey>,
    subscribers: Vec<Sender<PlaybackEvent>>,
    video: Option<VideoSynchronizer>,
}

impl PlaybackEngine {
    pub fn new(
        timeline: SharedTimeline,
        factory: Box<dyn PlayerFactory>,
        time: Arc<dyn TimeSource>,
        config: PlaybackConfig,
    ) -> Self {
        let mut clock = TransportClock::new(config.end_behavior);
        clock.set_total(timeline.read().total_duration(), time.now());
        Self {
            timeline,
            time,
            factory,
            config,
            clock,
            instances: HashMap::new(),
            exhausted: HashSet::new(),
            failed: HashSet::new(),
            subscribers: Vec::new(),
            video: None,
        }
    }

    pub fn config(&self) -> &PlaybackConfig { &self.config }

    pub fn timeline(&self) -> &SharedTimeline { &self.timeline }

    /// Attaches a preview surface that follows the transport from now on.
    pub fn attach_video(&mut self, surface: Box<dyn VideoSurface>) {
        let mut sync = VideoSynchronizer::new(surface, self.config.video_drift_tolerance);
        sync.follow(&self.status());
        self.video = Some(sync);
    }

    pub fn detach_video(&mut self) -> Option<VideoSynchronizer> { self.video.take() }

    pub fn video_mut(&mut self) -> Option<&mut VideoSynchronizer> { self.video.as_mut() }

    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            is_playing: self.clock.is_running(),
            global_time: self.clock.position(),
            total_duration: self.clock.total(),
        }
    }

    pub fn is_playing(&self) -> bool { self.clock.is_running() }

    pub fn active_keys(&self) -> Vec<InstanceKey> {
        let mut keys: Vec<InstanceKey> = self.instances.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn play(&mut self) {
        let now = self.refresh_total();
        if self.clock.is_running() { return; }
        if !self.clock.play(now) {
            tracing::debug!("play ignored on empty timeline");
            return;
        }
        let mut rejected = Vec::new();
        for (key, inst) in self.instances.iter_mut() {
            if let Err(err) = inst.player.play() {
                tracing::warn!(clip = %key.clip_id, track = key.track_index, error = %err, "player refused to resume");
                rejected.push(key.clone());
            }
        }
        for key in rejected { self.fail(key); }
        tracing::debug!(time = self.clock.position(), "playback started");
        self.reconcile(self.clock.position());
        self.state_changed();
    }

    pub fn pause(&mut self) {
        if !self.clock.is_running() { return; }
        self.clock.pause(self.time.now());
        for inst in self.instances.values_mut() { inst.player.pause(); }
        tracing::debug!(time = self.clock.position(), "playback paused");
        self.state_changed();
    }

    pub fn toggle_play_pause(&mut self) {
        if self.clock.is_running() { self.pause() } else { self.play() }
    }

    /// Stops everything and returns the playhead to 0.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.release_all();
        tracing::debug!("playback reset");
        self.state_changed();
    }

    /// Seeking to (or past) the end while playing finishes playback like running into it does.
    pub fn seek_to_time(&mut self, t: Seconds) {
        let now = self.refresh_total();
        let was_playing = self.clock.is_running();
        self.clock.pause(now);
        self.release_all();
        self.clock.seek(t, now);
        tracing::debug!(time = self.clock.position(), "seeked");
        if was_playing {
            if self.clock.position() >= self.clock.total() {
                self.clock.finish();
                self.complete();
                return;
            }
            if self.clock.play(now) {
                self.reconcile(self.clock.position());
            }
        }
        self.state_changed();
    }

    /// Sets a track's volume in the shared model and on its live instances. Returns the clamped value.
    pub fn set_track_volume(&mut self, track_index: usize, volume: f32) -> f32 {
        let applied = self.timeline.write().set_track_volume(track_index, volume);
        self.apply_track_gain(track_index);
        applied
    }

    pub fn track_volume(&self, track_index: usize) -> f32 { self.timeline.read().track_volume(track_index) }

    pub fn set_track_muted(&mut self, track_index: usize, muted: bool) {
        self.timeline.write().set_track_muted(track_index, muted);
        self.apply_track_gain(track_index);
    }

    /// Removes a clip from the model and releases its instance right away.
    pub fn remove_clip(&mut self, id: &ClipId) -> Result<Clip, PlaybackError> {
        let clip = self.timeline.write().remove_clip(id)?;
        let keys: Vec<InstanceKey> = self.instances.keys().filter(|k| &k.clip_id == id).cloned().collect();
        for key in keys { self.release(&key); }
        self.exhausted.retain(|k| &k.clip_id != id);
        self.failed.retain(|k| &k.clip_id != id);
        self.refresh_total();
        Ok(clip)
    }

    /// One reconciliation pass. Driven by [`crate::PlaybackDriver`] or called directly.
    pub fn tick(&mut self) -> PlaybackStatus {
        let now = self.refresh_total();
        if !self.clock.is_running() {
            return self.status();
        }
        let tick = self.clock.tick(now);
        if tick.finished {
            self.complete();
            return self.status();
        }
        self.reconcile(tick.position);
        let status = self.status();
        self.emit(PlaybackEvent::Tick(status));
        if let Some(video) = self.video.as_mut() { video.follow(&status); }
        status
    }

    fn complete(&mut self) {
        tracing::debug!(end_behavior = ?self.clock.end_behavior(), "reached end of timeline");
        self.release_all();
        self.emit(PlaybackEvent::Completed);
        self.state_changed();
    }

    fn reconcile(&mut self, t: Seconds) {
        let mut wanted: Vec<Wanted> = {
            let tl = self.timeline.read();
            tl.clips()
                .iter()
                .filter(|c| c.kind.is_audible() && c.is_active_at(t))
                .map(|c| Wanted { key: InstanceKey::of(c), clip: c.clone(), gain: tl.effective_gain(c.track_index) })
                .collect()
        };
        wanted.sort_by(|a, b| a.key.cmp(&b.key));
        let wanted_keys: HashSet<InstanceKey> = wanted.iter().map(|w| w.key.clone()).collect();

        let stale: Vec<InstanceKey> = self.instances.keys().filter(|k| !wanted_keys.contains(*k)).cloned().collect();
        for key in stale { self.release(&key); }
        self.exhausted.retain(|k| wanted_keys.contains(k));

        for w in wanted {
            if self.failed.contains(&w.key) || self.exhausted.contains(&w.key) { continue; }
            let offset = t - w.clip.start_time;

            if let Some(inst) = self.instances.get_mut(&w.key) {
                if inst.player.is_ended() {
                    tracing::debug!(clip = %w.key.clip_id, "media ended before its window");
                    self.release(&w.key);
                    self.exhausted.insert(w.key);
                    continue;
                }
                inst.player.set_volume(w.gain);
                // A move within the same track changes the window without changing the key.
                inst.start_time = w.clip.start_time;
                let drift = inst.player.position() - offset;
                if drift.abs() > self.config.drift_tolerance {
                    tracing::trace!(clip = %w.key.clip_id, drift, "resyncing player");
                    if let Err(err) = inst.player.seek(offset) {
                        tracing::warn!(clip = %w.key.clip_id, error = %err, "resync failed");
                        self.fail(w.key);
                    }
                }
                continue;
            }

            match self.start_instance(&w.clip, w.gain, offset) {
                Ok(player) => {
                    tracing::debug!(clip = %w.key.clip_id, track = w.key.track_index, offset, "instance started");
                    self.instances.insert(w.key, ActiveInstance { player, start_time: w.clip.start_time });
                }
                Err(err) => {
                    tracing::warn!(clip = %w.key.clip_id, track = w.key.track_index, error = %err, "clip skipped");
                    self.failed.insert(w.key);
                }
            }
        }
    }

    fn start_instance(&mut self, clip: &Clip, gain: f32, offset: Seconds) -> Result<Box<dyn ClipPlayer>, PlaybackError> {
        let mut player = self.factory.create(clip)?;
        player.set_volume(gain);
        let started = player.seek(offset).and_then(|_| player.play());
        match started {
            Ok(()) => Ok(player),
            Err(err) => {
                player.stop();
                Err(err)
            }
        }
    }

    fn apply_track_gain(&mut self, track_index: usize) {
        let gain = self.timeline.read().effective_gain(track_index);
        for (key, inst) in self.instances.iter_mut() {
            if key.track_index == track_index { inst.player.set_volume(gain); }
        }
    }

    fn fail(&mut self, key: InstanceKey) {
        self.release(&key);
        self.failed.insert(key);
    }

    fn release(&mut self, key: &InstanceKey) {
        if let Some(mut inst) = self.instances.remove(key) {
            inst.player.stop();
            tracing::trace!(clip = %key.clip_id, start = inst.start_time, "instance released");
        }
    }

    fn release_all(&mut self) {
        for (_, mut inst) in self.instances.drain() { inst.player.stop(); }
        self.exhausted.clear();
        self.failed.clear();
    }

    fn refresh_total(&mut self) -> std::time::Duration {
        let now = self.time.now();
        let total = self.timeline.read().total_duration();
        if total != self.clock.total() {
            let was_running = self.clock.is_running();
            self.clock.set_total(total, now);
            if was_running && !self.clock.is_running() {
                tracing::debug!("timeline emptied while playing");
                self.release_all();
                self.state_changed();
            }
        }
        now
    }

    fn state_changed(&mut self) {
        let status = self.status();
        self.emit(PlaybackEvent::StateChanged(status));
        if let Some(video) = self.video.as_mut() { video.follow(&status); }
    }

    fn emit(&mut self, event: PlaybackEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        for (_, mut inst) in self.instances.drain() { inst.player.stop(); }
    }
}
