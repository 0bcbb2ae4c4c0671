use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{Clip, ClipDraft, ClipId, Seconds, SharedTimeline, TimelineError};

pub const DEFAULT_TRACK_VOLUME: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    pub volume: f32,
    pub muted: bool,
    pub locked: bool,
}

impl Default for TrackState {
    fn default() -> Self { Self { volume: DEFAULT_TRACK_VOLUME, muted: false, locked: false } }
}

/// Derived view of one track: the clips sharing an index plus its scalar state.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackView {
    pub index: usize,
    pub state: TrackState,
    pub clip_ids: Vec<ClipId>,
}

/// Ordered multi-track arrangement. Tracks are implicit: a track exists while a clip uses its index.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    clips: Vec<Clip>,
    tracks: BTreeMap<usize, TrackState>,
    revision: u64,
}

impl Timeline {
    pub fn new() -> Self { Self::default() }

    pub fn shared(self) -> SharedTimeline { Arc::new(RwLock::new(self)) }

    /// Bumped on every mutation so readers can cheaply detect change.
    pub fn revision(&self) -> u64 { self.revision }

    pub fn clips(&self) -> &[Clip] { &self.clips }

    pub fn clip(&self, id: &ClipId) -> Option<&Clip> { self.clips.iter().find(|c| &c.id == id) }

    pub fn contains(&self, id: &ClipId) -> bool { self.clip(id).is_some() }

    pub fn is_empty(&self) -> bool { self.clips.is_empty() }

    pub fn clips_on_track(&self, track_index: usize) -> Vec<&Clip> {
        let mut out: Vec<&Clip> = self.clips.iter().filter(|c| c.track_index == track_index).collect();
        out.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        out
    }

    /// Track indices in use, ascending.
    pub fn track_indices(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = self.clips.iter().map(|c| c.track_index).collect();
        idx.sort_unstable();
        idx.dedup();
        idx
    }

    pub fn tracks(&self) -> Vec<TrackView> {
        self.track_indices()
            .into_iter()
            .map(|index| TrackView {
                index,
                state: self.track_state(index),
                clip_ids: self.clips_on_track(index).into_iter().map(|c| c.id.clone()).collect(),
            })
            .collect()
    }

    /// One index past the highest track in use, so the UI can always offer an empty track.
    pub fn next_track_index(&self) -> usize {
        self.clips.iter().map(|c| c.track_index + 1).max().unwrap_or(0)
    }

    pub fn total_duration(&self) -> Seconds {
        self.clips.iter().map(Clip::end_time).fold(0.0, f64::max)
    }

    /// Clips whose half-open window contains `t`, in track order.
    pub fn clips_at(&self, t: Seconds) -> Vec<&Clip> {
        let mut out: Vec<&Clip> = self.clips.iter().filter(|c| c.is_active_at(t)).collect();
        out.sort_by(|a, b| a.track_index.cmp(&b.track_index).then(a.start_time.total_cmp(&b.start_time)));
        out
    }

    fn track_end(&self, track_index: usize) -> Seconds {
        self.clips.iter().filter(|c| c.track_index == track_index).map(Clip::end_time).fold(0.0, f64::max)
    }

    pub fn track_state(&self, track_index: usize) -> TrackState {
        self.tracks.get(&track_index).copied().unwrap_or_default()
    }

    pub fn track_volume(&self, track_index: usize) -> f32 { self.track_state(track_index).volume }

    pub fn is_track_muted(&self, track_index: usize) -> bool { self.track_state(track_index).muted }

    /// Gain actually applied to every clip of the track.
    pub fn effective_gain(&self, track_index: usize) -> f32 {
        let state = self.track_state(track_index);
        if state.muted { 0.0 } else { state.volume }
    }

    /// Resolves every optional positional field of a draft. All placement goes through here.
    pub fn place(&self, draft: &ClipDraft) -> Result<Clip, TimelineError> {
        if !(draft.duration.is_finite() && draft.duration > 0.0) {
            return Err(TimelineError::UnresolvedDuration(draft.id.clone()));
        }
        if self.contains(&draft.id) {
            return Err(TimelineError::DuplicateClip(draft.id.clone()));
        }
        let track_index = draft.track_index.unwrap_or(0);
        let start_time = match draft.start_time {
            Some(t) if t.is_finite() => t.max(0.0),
            _ => self.track_end(track_index),
        };
        Ok(Clip {
            id: draft.id.clone(),
            name: draft.name.clone(),
            kind: draft.kind,
            media: draft.media.clone(),
            duration: draft.duration,
            track_index,
            start_time,
            track_volume: self.track_volume(track_index),
        })
    }

    pub fn add_clip(&mut self, draft: ClipDraft) -> Result<&Clip, TimelineError> {
        let clip = self.place(&draft)?;
        self.ensure_unlocked(clip.track_index)?;
        tracing::debug!(clip = %clip.id, track = clip.track_index, start = clip.start_time, duration = clip.duration, "clip placed");
        self.clips.push(clip);
        self.revision += 1;
        Ok(&self.clips[self.clips.len() - 1])
    }

    pub fn remove_clip(&mut self, id: &ClipId) -> Result<Clip, TimelineError> {
        let pos = self.clips.iter().position(|c| &c.id == id).ok_or_else(|| TimelineError::ClipNotFound(id.clone()))?;
        self.ensure_unlocked(self.clips[pos].track_index)?;
        let clip = self.clips.remove(pos);
        self.revision += 1;
        tracing::debug!(clip = %clip.id, track = clip.track_index, "clip removed");
        Ok(clip)
    }

    /// Repositions a clip. Overlaps on the destination track are not resolved.
    pub fn move_clip(&mut self, id: &ClipId, start_time: Seconds, track_index: usize) -> Result<&Clip, TimelineError> {
        let pos = self.clips.iter().position(|c| &c.id == id).ok_or_else(|| TimelineError::ClipNotFound(id.clone()))?;
        self.ensure_unlocked(self.clips[pos].track_index)?;
        self.ensure_unlocked(track_index)?;
        let volume = self.track_volume(track_index);
        let clip = &mut self.clips[pos];
        clip.start_time = if start_time.is_finite() { start_time.max(0.0) } else { clip.start_time };
        clip.track_index = track_index;
        clip.track_volume = volume;
        self.revision += 1;
        Ok(&self.clips[pos])
    }

    /// Sets the track scalar (clamped to `[0, 1]`) and mirrors it onto every clip of the track.
    pub fn set_track_volume(&mut self, track_index: usize, volume: f32) -> f32 {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.tracks.entry(track_index).or_default().volume = volume;
        for clip in self.clips.iter_mut().filter(|c| c.track_index == track_index) {
            clip.track_volume = volume;
        }
        self.revision += 1;
        volume
    }

    pub fn set_track_muted(&mut self, track_index: usize, muted: bool) {
        self.tracks.entry(track_index).or_default().muted = muted;
        self.revision += 1;
    }

    pub fn set_track_locked(&mut self, track_index: usize, locked: bool) {
        self.tracks.entry(track_index).or_default().locked = locked;
        self.revision += 1;
    }

    fn ensure_unlocked(&self, track_index: usize) -> Result<(), TimelineError> {
        if self.track_state(track_index).locked { Err(TimelineError::TrackLocked(track_index)) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClipKind, MediaRef};

    fn draft(id: &str, duration: f64) -> ClipDraft {
        ClipDraft::new(id, ClipKind::Audio, MediaRef::file(format!("{id}.wav")), duration).with_id(id)
    }

    fn scenario() -> Timeline {
        let mut tl = Timeline::new();
        tl.add_clip(draft("a", 4.0).on_track(0).at(0.0)).unwrap();
        tl.add_clip(draft("b", 6.0).on_track(0).at(4.0)).unwrap();
        tl.add_clip(draft("c", 3.0).on_track(1).at(2.0)).unwrap();
        tl
    }

    fn ids(clips: Vec<&Clip>) -> Vec<&str> { clips.into_iter().map(|c| c.id.as_str()).collect() }

    #[test]
    fn scenario_duration_and_activity() {
        let tl = scenario();
        assert_eq!(tl.total_duration(), 10.0);
        assert_eq!(ids(tl.clips_at(3.0)), vec!["a", "c"]);
        assert_eq!(ids(tl.clips_at(5.0)), vec!["b"]);
    }

    #[test]
    fn sequential_placement_defaults() {
        let mut tl = Timeline::new();
        tl.add_clip(draft("a", 2.5)).unwrap();
        let b = tl.add_clip(draft("b", 1.0)).unwrap();
        assert_eq!(b.track_index, 0);
        assert_eq!(b.start_time, 2.5);
        let c = tl.add_clip(draft("c", 1.0).on_track(3)).unwrap();
        assert_eq!(c.start_time, 0.0);
        assert_eq!(tl.next_track_index(), 4);
    }

    #[test]
    fn rejects_unresolved_and_duplicate() {
        let mut tl = Timeline::new();
        assert_eq!(tl.add_clip(draft("z", 0.0)).unwrap_err(), TimelineError::UnresolvedDuration("z".into()));
        assert!(matches!(tl.add_clip(draft("n", f64::NAN)), Err(TimelineError::UnresolvedDuration(_))));
        tl.add_clip(draft("a", 1.0)).unwrap();
        assert_eq!(tl.add_clip(draft("a", 1.0).on_track(2)).unwrap_err(), TimelineError::DuplicateClip("a".into()));
        assert_eq!(tl.clips().len(), 1);
    }

    #[test]
    fn duration_tracks_max_end() {
        let mut tl = scenario();
        tl.add_clip(draft("d", 5.0).on_track(2).at(8.0)).unwrap();
        assert_eq!(tl.total_duration(), 13.0);
        tl.remove_clip(&"d".into()).unwrap();
        assert_eq!(tl.total_duration(), 10.0);
        tl.remove_clip(&"b".into()).unwrap();
        assert_eq!(tl.total_duration(), 5.0);
        assert_eq!(Timeline::new().total_duration(), 0.0);
    }

    #[test]
    fn volume_scoped_to_track() {
        let mut tl = scenario();
        assert_eq!(tl.set_track_volume(1, 0.5), 0.5);
        for clip in tl.clips() {
            let expected = if clip.track_index == 1 { 0.5 } else { 1.0 };
            assert_eq!(clip.track_volume, expected);
            assert_eq!(tl.track_volume(clip.track_index), expected);
        }
        assert_eq!(tl.set_track_volume(0, 3.0), 1.0);
        assert_eq!(tl.set_track_volume(0, -1.0), 0.0);
    }

    #[test]
    fn placed_clip_inherits_track_volume() {
        let mut tl = Timeline::new();
        tl.set_track_volume(2, 0.25);
        let clip = tl.add_clip(draft("a", 1.0).on_track(2)).unwrap();
        assert_eq!(clip.track_volume, 0.25);
    }

    #[test]
    fn mute_zeroes_gain_only() {
        let mut tl = scenario();
        tl.set_track_volume(0, 0.8);
        tl.set_track_muted(0, true);
        assert_eq!(tl.effective_gain(0), 0.0);
        assert_eq!(tl.track_volume(0), 0.8);
        assert_eq!(tl.effective_gain(1), 1.0);
        assert_eq!(ids(tl.clips_at(3.0)), vec!["a", "c"]);
    }

    #[test]
    fn locked_track_rejects_mutation() {
        let mut tl = scenario();
        tl.set_track_locked(1, true);
        assert_eq!(tl.remove_clip(&"c".into()).unwrap_err(), TimelineError::TrackLocked(1));
        assert_eq!(tl.add_clip(draft("x", 1.0).on_track(1)).unwrap_err(), TimelineError::TrackLocked(1));
        assert_eq!(tl.move_clip(&"a".into(), 1.0, 1).unwrap_err(), TimelineError::TrackLocked(1));
    }

    #[test]
    fn move_repositions_and_adopts_volume() {
        let mut tl = scenario();
        tl.set_track_volume(3, 0.3);
        let rev = tl.revision();
        let moved = tl.move_clip(&"c".into(), -2.0, 3).unwrap();
        assert_eq!(moved.start_time, 0.0);
        assert_eq!(moved.track_index, 3);
        assert_eq!(moved.track_volume, 0.3);
        assert!(tl.revision() > rev);
        assert!(matches!(tl.move_clip(&"nope".into(), 0.0, 0), Err(TimelineError::ClipNotFound(_))));
    }

    #[test]
    fn track_views_sorted() {
        let tl = scenario();
        let tracks = tl.tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].index, 0);
        assert_eq!(tracks[0].clip_ids, vec![ClipId::from("a"), ClipId::from("b")]);
        assert_eq!(tracks[1].clip_ids, vec![ClipId::from("c")]);
    }

    #[test]
    fn overlapping_clips_both_active() {
        let mut tl = Timeline::new();
        tl.add_clip(draft("a", 4.0).at(0.0)).unwrap();
        tl.add_clip(draft("b", 4.0).at(2.0)).unwrap();
        assert_eq!(ids(tl.clips_at(3.0)), vec!["a", "b"]);
    }
}
