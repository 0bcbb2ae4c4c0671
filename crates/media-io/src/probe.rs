use std::process::{Command, Stdio};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use timeline::MediaRef;

use crate::{ffprobe_binary, MediaError, SpooledMedia};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub frame_rate: Option<f64>,
    pub has_audio: bool,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    avg_frame_rate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Reads dimensions, duration and audio presence of a video through ffprobe.
pub fn probe_video(media: &MediaRef) -> Result<VideoInfo, MediaError> {
    let ffprobe = ffprobe_binary()?;
    let input = SpooledMedia::new(media)?;
    let out = Command::new(&ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
        .arg(input.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("spawning {}", ffprobe.display()))?;
    if !out.status.success() {
        return Err(MediaError::Probe(String::from_utf8_lossy(&out.stderr).trim().to_string()));
    }
    parse_probe_json(&out.stdout)
}

fn parse_probe_json(raw: &[u8]) -> Result<VideoInfo, MediaError> {
    let parsed: ProbeOutput = serde_json::from_slice(raw).map_err(|e| MediaError::Probe(e.to_string()))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(MediaError::NoVideoStream)?;
    let has_audio = parsed.streams.iter().any(|s| s.codec_type.as_deref() == Some("audio"));

    let duration = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| MediaError::Probe("duration unavailable".into()))?;

    Ok(VideoInfo {
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        duration,
        frame_rate: video.avg_frame_rate.as_deref().and_then(parse_rational),
        has_audio,
    })
}

fn parse_rational(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    (den > 0.0 && num > 0.0).then(|| num / den)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_with_audio() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080, "avg_frame_rate": "30000/1001", "duration": "12.5"},
                {"codec_type": "audio"}
            ],
            "format": {"duration": "12.512"}
        }"#;
        let info = parse_probe_json(json).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.duration - 12.512).abs() < 1e-9);
        assert!((info.frame_rate.unwrap() - 29.97).abs() < 0.01);
        assert!(info.has_audio);
    }

    #[test]
    fn audio_only_is_not_a_video() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3.0"}}"#;
        assert!(matches!(parse_probe_json(json), Err(MediaError::NoVideoStream)));
    }

    #[test]
    fn falls_back_to_stream_duration() {
        let json = br#"{"streams": [{"codec_type": "video", "width": 640, "height": 360, "duration": "4.0", "avg_frame_rate": "0/0"}]}"#;
        let info = parse_probe_json(json).unwrap();
        assert_eq!(info.duration, 4.0);
        assert_eq!(info.frame_rate, None);
        assert!(!info.has_audio);
    }
}
