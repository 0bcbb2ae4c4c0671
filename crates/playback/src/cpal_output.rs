use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use media_io::{AudioDecoder, PcmBuffer};
use parking_lot::Mutex;
use timeline::{Clip, MediaRef, Seconds};

use crate::{ClipPlayer, PlaybackError, PlayerFactory};

struct Voice {
    id: u64,
    // None until the decode worker delivers the media.
    buffer: Option<Arc<PcmBuffer>>,
    // Playhead into the source media.
    position: Seconds,
    // Length of one output frame.
    dt: f64,
    volume: f32,
    playing: bool,
    ended: bool,
}

impl Voice {
    fn sample(&self, out_channel: usize) -> f32 {
        let Some(buffer) = &self.buffer else { return 0.0 };
        let src = out_channel.min(buffer.channel_count().saturating_sub(1));
        let data = buffer.channel(src);
        let cursor = self.position * buffer.sample_rate() as f64;
        let idx = cursor as usize;
        if idx >= data.len() { return 0.0; }
        let a = data[idx];
        let b = data[(idx + 1).min(data.len() - 1)];
        a + (b - a) * (cursor - idx as f64) as f32
    }

    fn past_end(&self) -> bool {
        self.buffer.as_ref().is_some_and(|b| self.position * b.sample_rate() as f64 >= b.frames() as f64)
    }

    // A voice still waiting for its media keeps time silently.
    fn advance(&mut self) {
        self.position += self.dt;
        if self.past_end() {
            self.ended = true;
            self.playing = false;
        }
    }
}

type Voices = Arc<Mutex<Vec<Voice>>>;

/// The process' audio device. The cpal stream lives on a dedicated thread because it is not `Send`.
pub struct CpalOutput {
    voices: Voices,
    next_id: AtomicU64,
    sample_rate: u32,
    channels: u16,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn open() -> Result<Arc<Self>, PlaybackError> {
        let voices: Voices = Arc::default();
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded(1);
        let thread = {
            let voices = voices.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("audio-output".into())
                .spawn(move || run_output(voices, stop, ready_tx))
                .map_err(|e| PlaybackError::Output(e.to_string()))?
        };
        let (sample_rate, channels) = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(reason)) => {
                let _ = thread.join();
                return Err(PlaybackError::Output(reason));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(PlaybackError::Output("audio thread exited during setup".into()));
            }
        };
        tracing::info!(sample_rate, channels, "audio output opened");
        Ok(Arc::new(Self { voices, next_id: AtomicU64::new(1), sample_rate, channels, stop, thread: Some(thread) }))
    }

    pub fn sample_rate(&self) -> u32 { self.sample_rate }

    pub fn channels(&self) -> u16 { self.channels }

    fn add_voice(&self, buffer: Option<Arc<PcmBuffer>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dt = 1.0 / self.sample_rate.max(1) as f64;
        self.voices.lock().push(Voice { id, buffer, position: 0.0, dt, volume: 1.0, playing: false, ended: false });
        id
    }

    fn attach(&self, id: u64, buffer: Arc<PcmBuffer>) {
        self.with_voice(id, |v| {
            v.buffer = Some(buffer);
            if v.past_end() {
                v.ended = true;
                v.playing = false;
            }
        });
    }

    fn fail(&self, id: u64) {
        self.with_voice(id, |v| {
            v.ended = true;
            v.playing = false;
        });
    }

    fn with_voice<R>(&self, id: u64, f: impl FnOnce(&mut Voice) -> R) -> Option<R> {
        self.voices.lock().iter_mut().find(|v| v.id == id).map(f)
    }

    fn remove_voice(&self, id: u64) { self.voices.lock().retain(|v| v.id != id); }

    #[cfg(test)]
    fn detached(sample_rate: u32, channels: u16) -> Arc<Self> {
        Arc::new(Self {
            voices: Arc::default(),
            next_id: AtomicU64::new(1),
            sample_rate,
            channels,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.thread.take() { let _ = h.join(); }
    }
}

fn run_output(voices: Voices, stop: Arc<AtomicBool>, ready: Sender<Result<(u32, u16), String>>) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err("no default output device".into()));
        return;
    };
    let supported = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config = supported.config();
    let err_fn = |e: cpal::StreamError| tracing::warn!(error = %e, "cpal stream error");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            let v = voices.clone();
            device.build_output_stream(&config, move |out: &mut [f32], _: &cpal::OutputCallbackInfo| render(out, channels, &v, |s| s), err_fn, None)
        }
        cpal::SampleFormat::I16 => {
            let v = voices.clone();
            device.build_output_stream(
                &config,
                move |out: &mut [i16], _: &cpal::OutputCallbackInfo| render(out, channels, &v, |s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let v = voices.clone();
            device.build_output_stream(
                &config,
                move |out: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    render(out, channels, &v, |s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i32 + 32768) as u16)
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = ready.send(Err(format!("unsupported sample format {other:?}")));
            return;
        }
    };
    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(e.to_string()));
        return;
    }
    let _ = ready.send(Ok((sample_rate, channels)));
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(20));
    }
    drop(stream);
}

fn render<T: Copy>(out: &mut [T], channels: u16, voices: &Mutex<Vec<Voice>>, convert: impl Fn(f32) -> T) {
    let n = channels.max(1) as usize;
    let mut voices = voices.lock();
    for frame in out.chunks_mut(n) {
        for (c, slot) in frame.iter_mut().enumerate() {
            let acc: f32 = voices.iter().filter(|v| v.playing).map(|v| v.sample(c) * v.volume).sum();
            *slot = convert(acc);
        }
        for v in voices.iter_mut().filter(|v| v.playing) { v.advance(); }
    }
}

enum Decoded {
    // Voices waiting for this media.
    Pending(Vec<u64>),
    Ready(Arc<PcmBuffer>),
    Failed(String),
}

type DecodeCache = Arc<Mutex<HashMap<String, Decoded>>>;

struct DecodeJob {
    key: String,
    media: MediaRef,
}

/// Creates one cpal voice per clip instance. Media is decoded on an `audio-decode` thread and
/// cached per source, so `create` never blocks the tick. A voice starts sounding once its
/// buffer arrives, already at the position it would have reached.
pub struct CpalPlayerFactory {
    output: Arc<CpalOutput>,
    cache: DecodeCache,
    jobs: Option<Sender<DecodeJob>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalPlayerFactory {
    pub fn new(output: Arc<CpalOutput>, decoder: Arc<dyn AudioDecoder>) -> Result<Self, PlaybackError> {
        let cache: DecodeCache = Arc::default();
        let (tx, rx) = unbounded();
        let worker = {
            let output = output.clone();
            let cache = cache.clone();
            thread::Builder::new()
                .name("audio-decode".into())
                .spawn(move || run_decoder(decoder, output, cache, rx))
                .map_err(|e| PlaybackError::Output(e.to_string()))?
        };
        Ok(Self { output, cache, jobs: Some(tx), worker: Some(worker) })
    }

    /// Forgets decoded and failed media. Decodes still in flight are kept.
    pub fn clear_cache(&mut self) { self.cache.lock().retain(|_, d| matches!(d, Decoded::Pending(_))); }
}

impl Drop for CpalPlayerFactory {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(h) = self.worker.take() { let _ = h.join(); }
    }
}

fn run_decoder(decoder: Arc<dyn AudioDecoder>, output: Arc<CpalOutput>, cache: DecodeCache, jobs: Receiver<DecodeJob>) {
    for job in jobs.iter() {
        let result = decoder.decode(&job.media);
        let mut cache = cache.lock();
        let waiting = match cache.remove(&job.key) {
            Some(Decoded::Pending(ids)) => ids,
            _ => Vec::new(),
        };
        let entry = match result {
            Ok(buffer) => {
                tracing::debug!(media = %job.key, frames = buffer.frames(), "audio decoded");
                let buffer = Arc::new(buffer);
                for id in waiting { output.attach(id, buffer.clone()); }
                Decoded::Ready(buffer)
            }
            Err(e) => {
                tracing::warn!(media = %job.key, error = %e, "audio decode failed");
                for id in waiting { output.fail(id); }
                Decoded::Failed(e.to_string())
            }
        };
        cache.insert(job.key, entry);
    }
}

impl PlayerFactory for CpalPlayerFactory {
    fn create(&mut self, clip: &Clip) -> Result<Box<dyn ClipPlayer>, PlaybackError> {
        let key = clip.media.cache_key();
        let mut queue = false;
        let id = {
            let mut cache = self.cache.lock();
            match cache.entry(key.clone()) {
                Entry::Occupied(mut e) => match e.get_mut() {
                    Decoded::Ready(buffer) => self.output.add_voice(Some(buffer.clone())),
                    Decoded::Pending(waiting) => {
                        let id = self.output.add_voice(None);
                        waiting.push(id);
                        id
                    }
                    Decoded::Failed(reason) => {
                        return Err(PlaybackError::PlayerCreate { clip: clip.id.clone(), reason: reason.clone() });
                    }
                },
                Entry::Vacant(e) => {
                    let id = self.output.add_voice(None);
                    e.insert(Decoded::Pending(vec![id]));
                    queue = true;
                    id
                }
            }
        };
        if queue {
            let sent = self.jobs.as_ref().is_some_and(|tx| tx.send(DecodeJob { key: key.clone(), media: clip.media.clone() }).is_ok());
            if !sent {
                self.cache.lock().remove(&key);
                self.output.remove_voice(id);
                return Err(PlaybackError::PlayerCreate { clip: clip.id.clone(), reason: "audio decoder stopped".into() });
            }
        }
        Ok(Box::new(CpalPlayer { output: self.output.clone(), id }))
    }
}

pub struct CpalPlayer {
    output: Arc<CpalOutput>,
    id: u64,
}

impl ClipPlayer for CpalPlayer {
    fn play(&mut self) -> Result<(), PlaybackError> {
        self.output
            .with_voice(self.id, |v| v.playing = !v.ended)
            .ok_or_else(|| PlaybackError::Play("voice already released".into()))
    }

    fn pause(&mut self) { self.output.with_voice(self.id, |v| v.playing = false); }

    fn seek(&mut self, offset: Seconds) -> Result<(), PlaybackError> {
        self.output
            .with_voice(self.id, |v| {
                v.position = offset.max(0.0);
                v.ended = v.past_end();
                if v.ended { v.playing = false; }
            })
            .ok_or_else(|| PlaybackError::Seek("voice already released".into()))
    }

    fn position(&self) -> Seconds { self.output.with_voice(self.id, |v| v.position).unwrap_or(0.0) }

    fn set_volume(&mut self, volume: f32) { self.output.with_voice(self.id, |v| v.volume = volume.max(0.0)); }

    fn is_ended(&self) -> bool { self.output.with_voice(self.id, |v| v.ended).unwrap_or(true) }

    fn stop(&mut self) { self.output.remove_voice(self.id); }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) { self.output.remove_voice(self.id); }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use media_io::MediaError;
    use timeline::{ClipKind, MediaRef};

    use super::*;

    fn voice(id: u64, samples: Vec<f32>, volume: f32) -> Voice {
        Voice {
            id,
            buffer: Some(Arc::new(PcmBuffer::from_planar(4, vec![samples]))),
            position: 0.0,
            dt: 0.25,
            volume,
            playing: true,
            ended: false,
        }
    }

    fn clip(path: &str) -> Clip {
        Clip {
            id: path.into(),
            name: path.into(),
            kind: ClipKind::Audio,
            media: MediaRef::file(path),
            duration: 2.0,
            track_index: 0,
            start_time: 0.0,
            track_volume: 1.0,
        }
    }

    /// Holds every decode until the test lets it through.
    struct GatedDecoder {
        release: Receiver<()>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl AudioDecoder for GatedDecoder {
        fn decode(&self, _media: &MediaRef) -> Result<PcmBuffer, MediaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.recv();
            if self.fail {
                return Err(MediaError::Decode("corrupt stream".into()));
            }
            Ok(PcmBuffer::from_planar(4, vec![vec![0.5; 8]]))
        }
    }

    fn gated(fail: bool) -> (Arc<GatedDecoder>, Sender<()>) {
        let (tx, rx) = unbounded();
        (Arc::new(GatedDecoder { release: rx, calls: AtomicUsize::new(0), fail }), tx)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn render_sums_playing_voices_into_every_channel() {
        let voices = Mutex::new(vec![voice(1, vec![0.5, 0.5], 1.0), voice(2, vec![0.25, 0.25], 0.5)]);
        let mut out = [0.0f32; 4];
        render(&mut out, 2, &voices, |s| s);
        assert_eq!(out, [0.625, 0.625, 0.625, 0.625]);
    }

    #[test]
    fn voice_ends_after_last_frame() {
        let voices = Mutex::new(vec![voice(1, vec![1.0], 1.0)]);
        let mut out = [0.0f32; 3];
        render(&mut out, 1, &voices, |s| s);
        assert_eq!(out, [1.0, 0.0, 0.0]);
        assert!(voices.lock()[0].ended);
    }

    #[test]
    fn half_step_interpolates() {
        let mut v = voice(1, vec![0.0, 1.0], 1.0);
        v.dt = 0.125;
        v.advance();
        assert!((v.sample(0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn create_does_not_wait_for_the_decode() {
        let output = CpalOutput::detached(4, 1);
        let (decoder, release) = gated(false);
        let mut factory = CpalPlayerFactory::new(output.clone(), decoder.clone()).unwrap();

        let mut first = factory.create(&clip("a.wav")).unwrap();
        let _second = factory.create(&clip("a.wav")).unwrap();
        assert!(output.voices.lock().iter().all(|v| v.buffer.is_none()));

        first.play().unwrap();
        let mut out = [0.0f32; 2];
        render(&mut out, 1, &output.voices, |s| s);
        assert_eq!(out, [0.0, 0.0]);
        assert!((first.position() - 0.5).abs() < 1e-9);

        release.send(()).unwrap();
        wait_until(|| output.voices.lock().iter().all(|v| v.buffer.is_some()));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);

        render(&mut out, 1, &output.voices, |s| s);
        assert_eq!(out, [0.5, 0.5]);
        assert!(!first.is_ended());

        // Decoded media is reused without another decode.
        let _third = factory.create(&clip("a.wav")).unwrap();
        assert!(output.voices.lock().iter().all(|v| v.buffer.is_some()));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn media_arriving_after_its_end_leaves_the_voice_ended() {
        let output = CpalOutput::detached(4, 1);
        let (decoder, release) = gated(false);
        let mut factory = CpalPlayerFactory::new(output.clone(), decoder).unwrap();

        let mut player = factory.create(&clip("a.wav")).unwrap();
        player.seek(3.0).unwrap();
        assert!(!player.is_ended());

        release.send(()).unwrap();
        wait_until(|| player.is_ended());
        assert!(player.play().is_ok());
        assert!(!output.voices.lock()[0].playing);
    }

    #[test]
    fn failed_decode_ends_waiting_voices_and_rejects_new_ones() {
        let output = CpalOutput::detached(4, 1);
        let (decoder, release) = gated(true);
        let mut factory = CpalPlayerFactory::new(output.clone(), decoder).unwrap();

        let player = factory.create(&clip("broken.wav")).unwrap();
        assert!(!player.is_ended());
        release.send(()).unwrap();
        wait_until(|| player.is_ended());

        let err = factory.create(&clip("broken.wav")).err().unwrap();
        assert!(matches!(err, PlaybackError::PlayerCreate { .. }));

        factory.clear_cache();
        let _retry = factory.create(&clip("broken.wav")).unwrap();
        release.send(()).unwrap();
    }

    #[test]
    fn dropping_a_player_releases_its_voice() {
        let output = CpalOutput::detached(4, 2);
        let (decoder, release) = gated(false);
        let mut factory = CpalPlayerFactory::new(output.clone(), decoder).unwrap();
        let player = factory.create(&clip("a.wav")).unwrap();
        assert_eq!(output.voices.lock().len(), 1);
        drop(player);
        assert!(output.voices.lock().is_empty());
        release.send(()).unwrap();
    }
}
