use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use playback::{
    ClipPlayer, EndBehavior, ManualTimeSource, PlaybackConfig, PlaybackDriver, PlaybackEngine, PlaybackError,
    PlaybackEvent, PlayerFactory, SystemTimeSource, VideoSurface,
};
use timeline::{Clip, ClipDraft, ClipKind, MediaRef, Seconds, Timeline};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Counters {
    created: usize,
    stopped: usize,
    positions: HashMap<String, f64>,
}

struct CountingPlayer {
    id: String,
    counters: Arc<Mutex<Counters>>,
}

impl ClipPlayer for CountingPlayer {
    fn play(&mut self) -> Result<(), PlaybackError> { Ok(()) }
    fn pause(&mut self) {}
    fn seek(&mut self, offset: Seconds) -> Result<(), PlaybackError> {
        self.counters.lock().positions.insert(self.id.clone(), offset);
        Ok(())
    }
    fn position(&self) -> Seconds { self.counters.lock().positions.get(&self.id).copied().unwrap_or(0.0) }
    fn set_volume(&mut self, _volume: f32) {}
    fn is_ended(&self) -> bool { false }
    fn stop(&mut self) { self.counters.lock().stopped += 1; }
}

struct CountingFactory(Arc<Mutex<Counters>>);

impl PlayerFactory for CountingFactory {
    fn create(&mut self, clip: &Clip) -> Result<Box<dyn ClipPlayer>, PlaybackError> {
        self.0.lock().created += 1;
        Ok(Box::new(CountingPlayer { id: clip.id.to_string(), counters: self.0.clone() }))
    }
}

#[derive(Default)]
struct SurfaceState {
    position: f64,
    playing: bool,
}

struct Preview(Arc<Mutex<SurfaceState>>);

impl VideoSurface for Preview {
    fn set_position(&mut self, t: Seconds) { self.0.lock().position = t; }
    fn position(&self) -> Seconds { self.0.lock().position }
    fn play(&mut self) -> Result<(), PlaybackError> {
        self.0.lock().playing = true;
        Ok(())
    }
    fn pause(&mut self) { self.0.lock().playing = false; }
}

fn documentary() -> Timeline {
    let mut tl = Timeline::new();
    tl.add_clip(ClipDraft::new("intro", ClipKind::Audio, MediaRef::file("intro.mp3"), 4.0).with_id("t0c1")).unwrap();
    tl.add_clip(ClipDraft::new("body", ClipKind::Audio, MediaRef::file("body.mp3"), 6.0).with_id("t0c2")).unwrap();
    tl.add_clip(
        ClipDraft::new("voice", ClipKind::ExtractedAudio, MediaRef::file("voice.wav"), 3.0).with_id("t1c1").on_track(1).at(2.0),
    )
    .unwrap();
    tl
}

#[test]
fn preview_follows_transport_through_seek_and_pause() {
    init_tracing();
    let counters = Arc::new(Mutex::new(Counters::default()));
    let time = ManualTimeSource::new();
    let mut engine = PlaybackEngine::new(
        documentary().shared(),
        Box::new(CountingFactory(counters.clone())),
        Arc::new(time.clone()),
        PlaybackConfig::default(),
    );
    let surface = Arc::new(Mutex::new(SurfaceState::default()));
    engine.attach_video(Box::new(Preview(surface.clone())));

    engine.play();
    assert!(surface.lock().playing);
    time.advance_secs(1.0);
    engine.tick();

    engine.seek_to_time(6.0);
    assert_eq!(surface.lock().position, 6.0);
    assert!(surface.lock().playing);

    engine.pause();
    assert!(!surface.lock().playing);
    assert_eq!(surface.lock().position, 6.0);
}

#[test]
fn hold_at_end_keeps_playhead() {
    let counters = Arc::new(Mutex::new(Counters::default()));
    let time = ManualTimeSource::new();
    let config = PlaybackConfig { end_behavior: EndBehavior::HoldAtEnd, ..PlaybackConfig::default() };
    let mut engine =
        PlaybackEngine::new(documentary().shared(), Box::new(CountingFactory(counters.clone())), Arc::new(time.clone()), config);
    let events = engine.subscribe();
    engine.play();
    time.advance_secs(11.0);
    let status = engine.tick();
    assert_eq!(status.global_time, 10.0);
    assert!(!status.is_playing);
    assert!(events.try_iter().any(|e| e == PlaybackEvent::Completed));
    let c = counters.lock();
    assert_eq!(c.created, c.stopped);
}

#[test]
fn clips_added_while_playing_extend_the_transport() {
    let counters = Arc::new(Mutex::new(Counters::default()));
    let time = ManualTimeSource::new();
    let shared = documentary().shared();
    let mut engine =
        PlaybackEngine::new(shared.clone(), Box::new(CountingFactory(counters.clone())), Arc::new(time.clone()), PlaybackConfig::default());
    engine.play();
    shared
        .write()
        .add_clip(ClipDraft::new("outro", ClipKind::Audio, MediaRef::file("outro.mp3"), 5.0).with_id("t0c3"))
        .unwrap();
    time.advance_secs(11.0);
    let status = engine.tick();
    assert_eq!(status.total_duration, 15.0);
    assert!(status.is_playing);
    assert_eq!(engine.active_keys().len(), 1);
    assert_eq!(engine.active_keys()[0].clip_id.as_str(), "t0c3");
}

#[test]
fn driver_ticks_in_the_background() {
    init_tracing();
    let counters = Arc::new(Mutex::new(Counters::default()));
    let config = PlaybackConfig { tick_interval_ms: 5, ..PlaybackConfig::default() };
    let engine = Arc::new(Mutex::new(PlaybackEngine::new(
        documentary().shared(),
        Box::new(CountingFactory(counters.clone())),
        Arc::new(SystemTimeSource::new()),
        config,
    )));
    let events = engine.lock().subscribe();
    engine.lock().play();
    let driver = PlaybackDriver::spawn(engine.clone()).unwrap();

    let got_tick = events
        .recv_timeout(Duration::from_secs(2))
        .into_iter()
        .chain(events.iter().take(5))
        .any(|e| matches!(e, PlaybackEvent::Tick(_)));
    driver.stop();
    assert!(got_tick);
    assert!(engine.lock().status().global_time > 0.0);
}
