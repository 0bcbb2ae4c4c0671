/// Linear PCM audio, planar `f32` channels at one sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    pub fn silent(channel_count: usize, frames: usize, sample_rate: u32) -> Self {
        Self { sample_rate, channels: vec![vec![0.0; frames]; channel_count.max(1)] }
    }

    /// Builds a buffer from planar channels. Shorter channels are zero-padded to the longest.
    pub fn from_planar(sample_rate: u32, mut channels: Vec<Vec<f32>>) -> Self {
        if channels.is_empty() { channels.push(Vec::new()); }
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        for ch in channels.iter_mut() { ch.resize(frames, 0.0); }
        Self { sample_rate, channels }
    }

    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        let n = channel_count.max(1);
        let frames = samples.len() / n;
        let mut channels = vec![Vec::with_capacity(frames); n];
        for frame in samples.chunks_exact(n) {
            for (c, s) in frame.iter().enumerate() { channels[c].push(*s); }
        }
        Self { sample_rate, channels }
    }

    pub fn to_interleaved(&self) -> Vec<f32> {
        let n = self.channels.len();
        let mut out = Vec::with_capacity(self.frames() * n);
        for i in 0..self.frames() {
            for ch in &self.channels { out.push(ch[i]); }
        }
        out
    }

    pub fn sample_rate(&self) -> u32 { self.sample_rate }

    pub fn channel_count(&self) -> usize { self.channels.len() }

    pub fn frames(&self) -> usize { self.channels.first().map_or(0, Vec::len) }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 { 0.0 } else { self.frames() as f64 / self.sample_rate as f64 }
    }

    pub fn channel(&self, index: usize) -> &[f32] { &self.channels[index] }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] { &mut self.channels[index] }

    /// Peak absolute amplitude of one channel.
    pub fn peak(&self, index: usize) -> f32 {
        self.channels[index].iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    pub fn truncate(&mut self, frames: usize) {
        for ch in self.channels.iter_mut() { ch.truncate(frames); }
    }

    /// Frame index of a timeline offset at this buffer's rate.
    pub fn frame_at(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * self.sample_rate as f64).round() as usize
    }

    pub fn resampled(&self, to_rate: u32) -> PcmBuffer {
        if to_rate == self.sample_rate || self.sample_rate == 0 { return self.clone(); }
        let channels = self.channels.iter().map(|ch| resample_linear(ch, self.sample_rate, to_rate)).collect();
        PcmBuffer { sample_rate: to_rate, channels }
    }
}

/// One-shot linear interpolation resample of a single channel.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }
    let step = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / step).round() as usize;
    let last = input.len() - 1;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * step;
        let idx = (pos as usize).min(last);
        let frac = (pos - idx as f64) as f32;
        let a = input[idx];
        let b = input[(idx + 1).min(last)];
        out.push(a + (b - a) * frac);
    }
    out
}
