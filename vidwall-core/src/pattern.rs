//! Synthetic test-pattern source.
//!
//! Moving color bars with a frame-number marker, timed at a fixed frame
//! rate. Useful for pipeline verification without any media files.

use crate::decode::{DecodeError, Decoder, StreamInfo};
use crate::frame_queue::{Frame, PixelFormat};

const BAR_COUNT: usize = 8;
/// Frame-number marker square, in pixels from the top-left corner
const MARKER_ORIGIN: usize = 10;
const MARKER_SIZE: usize = 20;

/// Deterministic color-bar decoder
pub struct TestPatternDecoder {
    info: StreamInfo,
    frame_count: u64,
    next_index: u64,
    /// Seeks land on the previous multiple of this many seconds
    keyframe_interval: Option<f64>,
}

impl TestPatternDecoder {
    pub fn new(width: u32, height: u32, frame_rate: f64, duration: f64) -> Self {
        let frame_rate = if frame_rate > 0.0 { frame_rate } else { 30.0 };
        let duration = duration.max(0.0);
        Self {
            info: StreamInfo {
                width: width.max(1),
                height: height.max(1),
                frame_rate,
                duration,
            },
            frame_count: (duration * frame_rate).ceil() as u64,
            next_index: 0,
            keyframe_interval: None,
        }
    }

    /// Make seeks imprecise like a container seek to the previous keyframe
    pub fn with_keyframe_interval(mut self, seconds: f64) -> Self {
        self.keyframe_interval = Some(seconds).filter(|s| *s > 0.0);
        self
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Bars are identical on every row, so one row is built and repeated.
    fn render(&self, index: u64, pts: f64) -> Frame {
        let width = self.info.width as usize;
        let height = self.info.height as usize;
        let shift = index as u8;

        let row: Vec<u8> = (0..width)
            .flat_map(|x| {
                let bar = (x * BAR_COUNT / width) as u8;
                [bar & 1, (bar >> 1) & 1, (bar >> 2) & 1].map(|on| (on * 255).wrapping_add(shift))
            })
            .collect();
        let mut data = row.repeat(height);

        let shade = index.wrapping_mul(3) as u8;
        let marker = [shade, 255 - shade, 128];
        let rows = MARKER_ORIGIN..(MARKER_ORIGIN + MARKER_SIZE).min(height);
        let cols = MARKER_ORIGIN..(MARKER_ORIGIN + MARKER_SIZE).min(width);
        for y in rows {
            let line = &mut data[y * width * 3..(y + 1) * width * 3];
            for x in cols.clone() {
                line[x * 3..x * 3 + 3].copy_from_slice(&marker);
            }
        }

        Frame::new(data, self.info.width, self.info.height, PixelFormat::Rgb24, pts)
    }
}

impl Decoder for TestPatternDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.next_index >= self.frame_count {
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index += 1;
        let pts = index as f64 / self.info.frame_rate;
        Ok(Some(self.render(index, pts)))
    }

    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError> {
        if !seconds.is_finite() {
            return Err(DecodeError::Seek {
                target: seconds,
                reason: "target is not a finite time".to_string(),
            });
        }

        let mut landing = seconds.max(0.0);
        if let Some(interval) = self.keyframe_interval {
            landing = (landing / interval).floor() * interval;
        }

        // Round before flooring so 15.0 * 25 lands on frame 375, not 374.
        let index = (landing * self.info.frame_rate + 1e-6).floor() as u64;
        self.next_index = index.min(self.frame_count);
        Ok(())
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_timed_by_index() {
        let mut decoder = TestPatternDecoder::new(8, 4, 25.0, 1.0);
        assert_eq!(decoder.frame_count(), 25);

        let first = decoder.next_frame().unwrap().unwrap();
        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.pts, 0.0);
        assert!((second.pts - 0.04).abs() < 1e-9);
        assert!(first.is_complete());
        assert_eq!(first.data.len(), 8 * 4 * 3);
    }

    #[test]
    fn test_end_of_stream() {
        let mut decoder = TestPatternDecoder::new(4, 4, 10.0, 0.5);
        let mut frames = 0;
        while decoder.next_frame().unwrap().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 5);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_seek_positions_exactly() {
        let mut decoder = TestPatternDecoder::new(4, 4, 25.0, 20.0);
        decoder.seek(15.0).unwrap();
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!((frame.pts - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_lands_on_keyframe() {
        let mut decoder = TestPatternDecoder::new(4, 4, 25.0, 20.0).with_keyframe_interval(2.0);
        decoder.seek(15.5).unwrap();
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!((frame.pts - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_past_end_hits_eos() {
        let mut decoder = TestPatternDecoder::new(4, 4, 25.0, 2.0);
        decoder.seek(30.0).unwrap();
        assert!(decoder.next_frame().unwrap().is_none());
        assert!(decoder.seek(f64::NAN).is_err());
    }

    #[test]
    fn test_marker_changes_per_frame() {
        let mut decoder = TestPatternDecoder::new(64, 48, 25.0, 1.0);
        let a = decoder.next_frame().unwrap().unwrap();
        let b = decoder.next_frame().unwrap().unwrap();
        let marker = (15 * 64 + 15) * 3;
        assert_ne!(a.data[marker], b.data[marker]);
        assert_eq!(a.data[marker + 2], 128);

        // Outside the marker, the bars shift by one step per frame.
        let bar = (40 * 64 + 40) * 3;
        assert_eq!(b.data[bar], a.data[bar].wrapping_add(1));
    }
}
