//! Placement-aware audio mixdown of decoded clips.

use media_io::{AudioDecoder, PcmBuffer};
use timeline::{ClipId, Seconds, SharedTimeline};

use crate::ExportError;

/// One decoded clip with the placement it is mixed at.
#[derive(Debug, Clone)]
pub struct PlacedAudio {
    pub clip_id: ClipId,
    pub track_index: usize,
    pub start_time: Seconds,
    pub duration: Seconds,
    pub gain: f32,
    pub pcm: PcmBuffer,
}

impl PlacedAudio {
    pub fn end_time(&self) -> Seconds { self.start_time + self.duration }
}

/// Result of an audio-only render.
#[derive(Debug, Clone)]
pub struct Mixdown {
    pub buffer: PcmBuffer,
    /// Per-channel scale applied by clipping protection (1.0 = untouched).
    pub channel_scale: Vec<f32>,
    pub decoded: usize,
    pub skipped: usize,
}

/// Mixes placed clips additively into one buffer sized to the latest end time.
/// The output takes the first clip's sample rate and the widest channel layout.
/// Tracks are summed in ascending index order.
pub fn mix_placed(clips: &[PlacedAudio]) -> Option<PcmBuffer> {
    let first = clips.first()?;
    let rate = first.pcm.sample_rate();
    let channels = clips.iter().map(|c| c.pcm.channel_count()).max().unwrap_or(1);
    let end = clips.iter().map(PlacedAudio::end_time).fold(0.0f64, f64::max);
    let mut out = PcmBuffer::silent(channels, (end * rate as f64).round() as usize, rate);
    let out_frames = out.frames();

    let mut order: Vec<&PlacedAudio> = clips.iter().collect();
    order.sort_by(|a, b| a.track_index.cmp(&b.track_index).then(a.start_time.total_cmp(&b.start_time)));

    for clip in order {
        let src = clip.pcm.resampled(rate);
        let offset = (clip.start_time.max(0.0) * rate as f64).round() as usize;
        let len = src.frames().min((clip.duration * rate as f64).round() as usize);
        let src_channels = src.channel_count();
        for c in 0..channels {
            let data = src.channel(c.min(src_channels - 1));
            let dst = out.channel_mut(c);
            for (i, s) in data[..len].iter().enumerate() {
                let at = offset + i;
                if at >= out_frames { break; }
                dst[at] += s * clip.gain;
            }
        }
    }
    Some(out)
}

/// Joins buffers back to back. Only valid for clips known to be contiguous on one track.
pub fn concat_contiguous(buffers: &[PcmBuffer]) -> Option<PcmBuffer> {
    let first = buffers.first()?;
    let rate = first.sample_rate();
    let channels = buffers.iter().map(PcmBuffer::channel_count).max().unwrap_or(1);
    let mut planar: Vec<Vec<f32>> = vec![Vec::new(); channels];
    for buf in buffers {
        let buf = buf.resampled(rate);
        let n = buf.channel_count();
        for (c, ch) in planar.iter_mut().enumerate() {
            ch.extend_from_slice(buf.channel(c.min(n - 1)));
        }
    }
    Some(PcmBuffer::from_planar(rate, planar))
}

/// Scales down every channel whose peak exceeds 1.0 so that its peak becomes exactly 1.0.
/// Channels already within range are left alone. Returns the factor applied per channel.
pub fn protect_clipping(buffer: &mut PcmBuffer) -> Vec<f32> {
    (0..buffer.channel_count())
        .map(|c| {
            let peak = buffer.peak(c);
            if peak <= 1.0 { return 1.0; }
            // dividing keeps the peak sample at exactly full scale
            for s in buffer.channel_mut(c) { *s /= peak; }
            1.0 / peak
        })
        .collect()
}

/// Decodes every audible clip of the timeline and mixes them down without touching video.
pub fn mixdown_only(timeline: &SharedTimeline, decoder: &dyn AudioDecoder) -> Result<Mixdown, ExportError> {
    let clips: Vec<_> = timeline.read().clips().iter().filter(|c| c.kind.is_audible()).cloned().collect();
    if clips.is_empty() {
        return Err(ExportError::NoPlayableAudio);
    }
    let mut placed = Vec::with_capacity(clips.len());
    let mut skipped = 0;
    for clip in &clips {
        match decoder.decode(&clip.media) {
            Ok(pcm) => {
                let gain = timeline.read().effective_gain(clip.track_index);
                placed.push(PlacedAudio {
                    clip_id: clip.id.clone(),
                    track_index: clip.track_index,
                    start_time: clip.start_time,
                    duration: clip.duration,
                    gain,
                    pcm,
                });
            }
            Err(err) => {
                tracing::warn!(clip = %clip.id, error = %err, "skipping clip that failed to decode");
                skipped += 1;
            }
        }
    }
    let mut buffer = mix_placed(&placed).ok_or(ExportError::NoAudioDecoded)?;
    let channel_scale = protect_clipping(&mut buffer);
    Ok(Mixdown { buffer, channel_scale, decoded: placed.len(), skipped })
}
