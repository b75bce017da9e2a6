//! Segment-restricted playback.
//!
//! A segment table confines the playhead to a set of `(start, duration)`
//! windows and loops among them. An empty table means no restriction.

use serde::{Deserialize, Serialize};

/// Default tolerance, in seconds, used to widen each segment window.
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// One play window. `duration == -1` runs to the end of the media.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_time: f64,
    pub duration: f64,
}

impl Segment {
    /// Sentinel duration for an open-ended segment
    pub const OPEN_ENDED: f64 = -1.0;

    pub fn new(start_time: f64, duration: f64) -> Self {
        Self { start_time, duration }
    }

    pub fn open_ended(start_time: f64) -> Self {
        Self::new(start_time, Self::OPEN_ENDED)
    }

    pub fn is_open_ended(&self) -> bool {
        self.duration < 0.0
    }

    /// End of the window, `None` when open-ended
    pub fn end(&self) -> Option<f64> {
        (!self.is_open_ended()).then(|| self.start_time + self.duration)
    }

    /// Half-open membership test widened by `tolerance` on both sides
    pub fn contains(&self, pts: f64, tolerance: f64) -> bool {
        if pts < self.start_time - tolerance {
            return false;
        }
        match self.end() {
            Some(end) => pts < end + tolerance,
            None => true,
        }
    }

    /// Why this segment is unusable, if it is
    pub fn problem(&self) -> Option<&'static str> {
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            Some("start_time must be a finite, non-negative number")
        } else if !self.duration.is_finite() {
            Some("duration must be finite")
        } else if self.duration != Self::OPEN_ENDED && self.duration <= 0.0 {
            Some("duration must be positive or -1")
        } else {
            None
        }
    }
}

/// Ordered segment list, scanned from the first entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentTable {
    segments: Vec<Segment>,
}

impl SegmentTable {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// A table that never restricts playback
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Where playback (re)starts: the first segment's start, or zero
    pub fn restart_point(&self) -> f64 {
        self.segments.first().map_or(0.0, |s| s.start_time)
    }

    /// The segment whose tolerant window holds `pts`, first match wins
    pub fn segment_at(&self, pts: f64, tolerance: f64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(pts, tolerance))
    }

    /// Jump target for a playhead at `pts`.
    ///
    /// - `None` when the table is empty or `pts` lies inside a window
    /// - the nearest segment start later than `pts` otherwise
    /// - the first segment's start when `pts` is past every segment
    pub fn next_time(&self, pts: f64, tolerance: f64) -> Option<f64> {
        let first = self.segments.first()?;

        if self.segment_at(pts, tolerance).is_some() {
            return None;
        }

        let later = self
            .segments
            .iter()
            .map(|s| s.start_time)
            .filter(|&start| pts < start - tolerance)
            .fold(None, |nearest: Option<f64>, start| match nearest {
                Some(n) if n <= start => Some(n),
                _ => Some(start),
            });

        Some(later.unwrap_or(first.start_time))
    }
}

impl From<Vec<Segment>> for SegmentTable {
    fn from(segments: Vec<Segment>) -> Self {
        Self::new(segments)
    }
}
