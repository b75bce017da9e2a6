//! ffmpeg subprocess decoder.
//!
//! Probes the source with `ffprobe`, then reads packed `rgb24` pictures from
//! `ffmpeg -f rawvideo` on a pipe. Seeking restarts the reader with an input
//! `-ss`, so every frame after a seek is timed from the seek target.

use crate::decode::{DecodeError, Decoder, DecoderOptions, StreamInfo};
use crate::frame_queue::{Frame, PixelFormat};
use serde::Deserialize;
use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

const FALLBACK_FRAME_RATE: f64 = 30.0;

#[derive(Deserialize)]
struct FfmpegProbe {
    #[serde(default)]
    streams: Vec<FfmpegStream>,
    format: Option<FfmpegFormat>,
}

#[derive(Deserialize)]
struct FfmpegStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct FfmpegFormat {
    duration: Option<String>,
}

fn parse_ffmpeg_rational(value: &str) -> Option<f64> {
    let mut parts = value.split('/');
    let numerator = parts.next()?.trim().parse::<f64>().ok()?;
    let denominator = match parts.next() {
        Some(d) => d.trim().parse::<f64>().ok()?,
        None => 1.0,
    };
    if denominator == 0.0 || numerator <= 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Turn `ffprobe -of json` output into stream info
fn parse_probe(json: &[u8], path: &Path) -> Result<StreamInfo, DecodeError> {
    let probe: FfmpegProbe =
        serde_json::from_slice(json).map_err(|e| DecodeError::Probe(format!("ffprobe parse: {}", e)))?;

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| DecodeError::NoVideoStream(path.to_path_buf()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(DecodeError::NoVideoStream(path.to_path_buf())),
    };

    let frame_rate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_ffmpeg_rational)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_ffmpeg_rational))
        .unwrap_or(FALLBACK_FRAME_RATE);

    let duration = parse_seconds(stream.duration.as_deref())
        .or_else(|| parse_seconds(probe.format.as_ref().and_then(|f| f.duration.as_deref())))
        .unwrap_or(0.0);

    Ok(StreamInfo {
        width,
        height,
        frame_rate,
        duration,
    })
}

fn probe_ffmpeg_video(path: &Path) -> Result<StreamInfo, DecodeError> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,avg_frame_rate,r_frame_rate,duration:format=duration")
        .arg("-of")
        .arg("json")
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| DecodeError::Spawn {
            program: "ffprobe",
            source,
        })?;

    if !output.status.success() {
        return Err(DecodeError::Probe(format!(
            "ffprobe error: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe(&output.stdout, path)
}

/// Command-line arguments for a raw-video reader starting at `seek`
fn reader_args(path: &Path, hwaccel: Option<&str>, seek: Option<f64>) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-hide_banner", "-nostdin"]
        .iter()
        .map(OsString::from)
        .collect();

    if let Some(hwaccel) = hwaccel {
        args.push("-hwaccel".into());
        args.push(hwaccel.into());
    }

    if let Some(seek) = seek.filter(|s| *s > 0.0) {
        args.push("-ss".into());
        args.push(format!("{:.3}", seek).into());
    }

    args.push("-i".into());
    args.push(path.as_os_str().to_os_string());
    for arg in ["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"] {
        args.push(arg.into());
    }
    args
}

struct FfmpegReader {
    child: Child,
    stdout: ChildStdout,
}

impl FfmpegReader {
    fn spawn(path: &Path, hwaccel: Option<&str>, seek: Option<f64>) -> Result<Self, DecodeError> {
        let mut child = Command::new("ffmpeg")
            .args(reader_args(path, hwaccel, seek))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: "ffmpeg",
                source,
            })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DecodeError::Failed("ffmpeg stdout unavailable".to_string()));
            }
        };

        Ok(Self { child, stdout })
    }

    /// Fill `buffer` with the next picture. `Ok(false)` at end of stream.
    fn read_picture(&mut self, buffer: &mut [u8]) -> Result<bool, DecodeError> {
        match self.stdout.read_exact(buffer) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                let status = self.child.wait()?;
                if status.success() {
                    Ok(false)
                } else {
                    Err(DecodeError::Failed(format!("ffmpeg exited with {}", status)))
                }
            }
            Err(e) => Err(DecodeError::Io(e)),
        }
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Decoder backed by an `ffmpeg` child process
pub struct FfmpegDecoder {
    path: PathBuf,
    hwaccel: Option<String>,
    info: StreamInfo,
    reader: Option<FfmpegReader>,
    frame_size: usize,
    /// PTS of the first picture the current reader produces
    base_pts: f64,
    frames_read: u64,
}

impl FfmpegDecoder {
    /// Probe `path` and start reading from the beginning
    pub fn open(path: &Path, options: &DecoderOptions) -> Result<Self, DecodeError> {
        if !path.exists() {
            return Err(DecodeError::NotFound(path.to_path_buf()));
        }

        let info = probe_ffmpeg_video(path)?;
        let hwaccel = options.hwaccel.clone();
        let reader = FfmpegReader::spawn(path, hwaccel.as_deref(), None)?;

        tracing::info!(
            "ffmpeg decoder open: {:?} {}x{} @ {:.3} fps, {:.3}s",
            path,
            info.width,
            info.height,
            info.frame_rate,
            info.duration
        );

        Ok(Self {
            path: path.to_path_buf(),
            hwaccel,
            frame_size: PixelFormat::Rgb24.buffer_size(info.width, info.height),
            info,
            reader: Some(reader),
            base_pts: 0.0,
            frames_read: 0,
        })
    }
}

impl Decoder for FfmpegDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let mut buffer = vec![0u8; self.frame_size];
        match reader.read_picture(&mut buffer) {
            Ok(true) => {}
            Ok(false) => {
                self.reader = None;
                return Ok(None);
            }
            Err(e) => {
                self.reader = None;
                return Err(e);
            }
        }

        let pts = self.base_pts + self.frames_read as f64 * self.info.frame_interval();
        self.frames_read += 1;

        Ok(Some(Frame::new(
            buffer,
            self.info.width,
            self.info.height,
            PixelFormat::Rgb24,
            pts,
        )))
    }

    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError> {
        let target = seconds.max(0.0);
        // Kill the old reader before starting its replacement.
        self.reader = None;

        let reader = FfmpegReader::spawn(&self.path, self.hwaccel.as_deref(), Some(target))
            .map_err(|e| DecodeError::Seek {
                target,
                reason: e.to_string(),
            })?;

        self.reader = Some(reader);
        self.base_pts = target;
        self.frames_read = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rational() {
        assert_eq!(parse_ffmpeg_rational("30/1"), Some(30.0));
        assert!((parse_ffmpeg_rational("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_ffmpeg_rational("25"), Some(25.0));
        assert_eq!(parse_ffmpeg_rational("0/0"), None);
        assert_eq!(parse_ffmpeg_rational("abc"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [{"width": 1920, "height": 1080, "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}],
            "format": {"duration": "20.040000"}
        }"#;
        let info = parse_probe(json, Path::new("clip.mp4")).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.frame_rate, 25.0);
        assert!((info.duration - 20.04).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_stream_duration_wins() {
        let json = br#"{
            "streams": [{"width": 640, "height": 360, "avg_frame_rate": "30/1", "duration": "9.5"}],
            "format": {"duration": "10.0"}
        }"#;
        let info = parse_probe(json, Path::new("clip.mkv")).unwrap();
        assert_eq!(info.duration, 9.5);
        assert_eq!(info.frame_rate, 30.0);
    }

    #[test]
    fn test_parse_probe_without_video() {
        let json = br#"{"streams": [], "format": {"duration": "3.0"}}"#;
        let result = parse_probe(json, Path::new("song.mp3"));
        assert!(matches!(result, Err(DecodeError::NoVideoStream(_))));
    }

    #[test]
    fn test_reader_args_with_hwaccel_and_seek() {
        let args = reader_args(Path::new("in.mp4"), Some("cuda"), Some(15.25));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        let hw = args.iter().position(|a| a == "-hwaccel").unwrap();
        assert_eq!(args[hw + 1], "cuda");
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "15.250");
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input && hw < input);
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_reader_args_from_start() {
        let args = reader_args(Path::new("in.mp4"), None, Some(0.0));
        assert!(!args.iter().any(|a| a == "-ss" || a == "-hwaccel"));
    }

    #[test]
    fn test_open_missing_file() {
        let result = FfmpegDecoder::open(Path::new("/no/such/video.mp4"), &DecoderOptions::default());
        assert!(matches!(result, Err(DecodeError::NotFound(_))));
    }
}
