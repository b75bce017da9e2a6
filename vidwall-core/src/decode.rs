//! # Decoder Capability
//!
//! Opaque interface to whatever turns a media source into pictures.
//! A panel's decode thread is the only caller of a decoder once it is open.
//!
//! ## Backends:
//! 1. ffmpeg subprocess (`FfmpegDecoder`) - any container ffmpeg can read
//! 2. Test pattern (`TestPatternDecoder`) - `pattern:<seconds>` sources

use crate::ffmpeg::FfmpegDecoder;
use crate::frame_queue::Frame;
use crate::pattern::TestPatternDecoder;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Source not found: {0}")]
    NotFound(PathBuf),
    #[error("Probe failed: {0}")]
    Probe(String),
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("No video stream in {0}")]
    NoVideoStream(PathBuf),
    #[error("Read failed: {0}")]
    Io(#[from] io::Error),
    #[error("Decode failed: {0}")]
    Failed(String),
    #[error("Seek to {target:.3}s failed: {reason}")]
    Seek { target: f64, reason: String },
}

/// Options passed to a decoder at open time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Hardware acceleration hint, passed through unvalidated
    pub hwaccel: Option<String>,
}

impl DecoderOptions {
    pub fn with_hwaccel(hwaccel: impl Into<String>) -> Self {
        Self {
            hwaccel: Some(hwaccel.into()),
        }
    }
}

/// Shape of a portrait / landscape / square picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
    Square,
}

/// What a decoder learned about its stream when it opened
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second
    pub frame_rate: f64,
    /// Total duration in seconds, 0 when unknown
    pub duration: f64,
}

impl StreamInfo {
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn orientation(&self) -> Orientation {
        let ratio = self.aspect_ratio();
        if ratio < 0.8 {
            Orientation::Portrait
        } else if ratio > 1.25 {
            Orientation::Landscape
        } else {
            Orientation::Square
        }
    }

    /// Seconds between consecutive frames
    pub fn frame_interval(&self) -> f64 {
        if self.frame_rate > 0.0 {
            1.0 / self.frame_rate
        } else {
            1.0 / 30.0
        }
    }
}

/// Decoder trait - implemented by all decoder backends
pub trait Decoder: Send {
    /// Stream properties discovered at open
    fn info(&self) -> &StreamInfo;

    /// Next frame in presentation order. `Ok(None)` is end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError>;

    /// Coarse seek; later frames start at or before `seconds`.
    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError>;

    /// Total duration in seconds
    fn duration(&self) -> f64 {
        self.info().duration
    }

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Prefix selecting the built-in test pattern, e.g. `pattern:20`
pub const PATTERN_SCHEME: &str = "pattern:";

/// Open the right decoder for `path`
pub fn open_decoder(path: &Path, options: &DecoderOptions) -> Result<Box<dyn Decoder>, DecodeError> {
    if let Some(duration_text) = path.to_str().and_then(|p| p.strip_prefix(PATTERN_SCHEME)) {
        let seconds = duration_text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite() && *s > 0.0)
            .ok_or_else(|| DecodeError::Probe(format!("invalid pattern duration: {:?}", duration_text)))?;
        return Ok(Box::new(TestPatternDecoder::new(320, 180, 30.0, seconds)));
    }

    Ok(Box::new(FfmpegDecoder::open(path, options)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32, height: u32) -> StreamInfo {
        StreamInfo {
            width,
            height,
            frame_rate: 25.0,
            duration: 10.0,
        }
    }

    #[test]
    fn test_orientation() {
        assert_eq!(info(1080, 1920).orientation(), Orientation::Portrait);
        assert_eq!(info(1920, 1080).orientation(), Orientation::Landscape);
        assert_eq!(info(1000, 1000).orientation(), Orientation::Square);
        assert_eq!(info(1100, 1000).orientation(), Orientation::Square);
    }

    #[test]
    fn test_frame_interval() {
        assert!((info(2, 2).frame_interval() - 0.04).abs() < 1e-9);
        let unknown = StreamInfo { frame_rate: 0.0, ..info(2, 2) };
        assert!((unknown.frame_interval() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_pattern_source() {
        let decoder = open_decoder(Path::new("pattern:12"), &DecoderOptions::default()).unwrap();
        assert_eq!(decoder.name(), "test-pattern");
        assert_eq!(decoder.duration(), 12.0);
    }

    #[test]
    fn test_open_bad_pattern_source() {
        let result = open_decoder(Path::new("pattern:soon"), &DecoderOptions::default());
        assert!(matches!(result, Err(DecodeError::Probe(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let result = open_decoder(
            Path::new("/definitely/not/here/clip.mp4"),
            &DecoderOptions::with_hwaccel("cuda"),
        );
        assert!(matches!(result, Err(DecodeError::NotFound(_))));
    }
}
