use std::fs::File;
use std::io::{self, Cursor};

use symphonia::core::{
    audio::{SampleBuffer, Signal},
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error,
    formats::FormatOptions,
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};
use timeline::MediaRef;

use crate::{MediaError, PcmBuffer};

/// Turns a clip's media into linear PCM. The export pipeline and the native playback
/// backend both decode through this seam.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, media: &MediaRef) -> Result<PcmBuffer, MediaError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, media: &MediaRef) -> Result<PcmBuffer, MediaError> { decode_media(media) }
}

fn open_source(media: &MediaRef) -> Result<Box<dyn MediaSource>, MediaError> {
    match media {
        MediaRef::File { path } => {
            let file = File::open(path).map_err(|e| MediaError::Open(format!("{}: {e}", path.display())))?;
            Ok(Box::new(file))
        }
        MediaRef::Memory { bytes, .. } => Ok(Box::new(Cursor::new(bytes.as_ref().clone()))),
    }
}

/// Decodes the first audio track of `media` into a planar buffer at its native rate.
pub fn decode_media(media: &MediaRef) -> Result<PcmBuffer, MediaError> {
    let mss = MediaSourceStream::new(open_source(media)?, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = media.extension() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| MediaError::UnsupportedFormat(e.to_string()))?;
    let mut format = probed.format;

    // Video containers list the picture stream first; pick the first track a codec exists for.
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or(MediaError::NoAudioTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channel_count = codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| MediaError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id { continue; }
                let decoded = match decoder.decode(&packet) {
                    Ok(buf) => buf,
                    Err(Error::DecodeError(e)) => {
                        tracing::trace!(error = e, "skipping undecodable packet");
                        continue;
                    }
                    Err(err) => return Err(MediaError::Decode(err.to_string())),
                };
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channel_count = spec.channels.count();
                let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(sample_buf.samples());
            }
            Err(Error::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(Error::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(Error::DecodeError(_)) => continue,
            Err(err) => return Err(MediaError::Decode(err.to_string())),
        }
    }

    if sample_rate == 0 || channel_count == 0 {
        return Err(MediaError::Decode("stream carries no sample format".into()));
    }
    let buffer = PcmBuffer::from_interleaved(&samples, channel_count, sample_rate);
    tracing::debug!(media = %media.cache_key(), frames = buffer.frames(), rate = sample_rate, channels = channel_count, "audio decoded");
    Ok(buffer)
}
