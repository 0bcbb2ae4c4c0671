use std::io::Write;
use std::path::Path;

use crate::PcmBuffer;

const HEADER_LEN: usize = 44;

/// Serializes a buffer as a canonical 16-bit PCM RIFF/WAVE file, channels interleaved.
pub fn encode_wav(buffer: &PcmBuffer) -> Vec<u8> {
    let channels = buffer.channel_count() as u16;
    let rate = buffer.sample_rate();
    let block_align = channels * 2;
    let data_len = (buffer.frames() * block_align as usize) as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in buffer.to_interleaved() {
        let v = s.clamp(-1.0, 1.0);
        let q = if v < 0.0 { v * 32768.0 } else { v * 32767.0 };
        out.extend_from_slice(&(q as i16).to_le_bytes());
    }
    out
}

pub fn write_wav(path: &Path, buffer: &PcmBuffer) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(&encode_wav(buffer))?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_describes_buffer() {
        let buf = PcmBuffer::silent(2, 100, 48000);
        let bytes = encode_wav(&buf);
        assert_eq!(bytes.len(), HEADER_LEN + 400);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 2);
        assert_eq!(u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]), 48000);
        assert_eq!(u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]), 400);
    }

    #[test]
    fn samples_are_clamped() {
        let buf = PcmBuffer::from_planar(8000, vec![vec![2.0, -2.0, 0.0]]);
        let bytes = encode_wav(&buf);
        let s = |i: usize| i16::from_le_bytes([bytes[HEADER_LEN + i * 2], bytes[HEADER_LEN + i * 2 + 1]]);
        assert_eq!(s(0), i16::MAX);
        assert_eq!(s(1), i16::MIN);
        assert_eq!(s(2), 0);
    }

    #[test]
    fn writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        write_wav(&path, &PcmBuffer::silent(1, 10, 8000)).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), (HEADER_LEN + 20) as u64);
    }
}
