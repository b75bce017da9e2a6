//! Decode thread: the producer side of a panel.
//!
//! The only code that calls into the decoder. Each pass does at most one of:
//! wait, apply a seek, apply a segment jump, restart at end of stream, or
//! read one frame.

use crate::config::PlaybackTuning;
use crate::decode::{DecodeError, Decoder};
use crate::player::PanelShared;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

/// Cap on the backoff after repeated faults or empty restarts, in poll intervals
const MAX_BACKOFF: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum DecodeState {
    /// Not started
    Idle,
    Reading,
    /// A seek request was applied this pass
    SeekPending,
    /// A segment jump was applied this pass
    SegmentJump,
    /// Decoded a frame at `pts` outside every segment window; waiting for
    /// the queue to drain before jumping to the next window
    WindowEnd { pts: f64 },
    /// End of stream; waiting for the queue to drain before restarting
    Exhausted,
}

pub(crate) struct DecodeLoop {
    decoder: Box<dyn Decoder>,
    shared: Arc<PanelShared>,
    tuning: PlaybackTuning,
    label: String,
    state: DecodeState,
    /// Frames below this PTS are dropped (settle pass after an accurate seek)
    settle_floor: Option<f64>,
    /// PTS of the last frame queued since the last reposition
    last_queued: Option<f64>,
    frames_since_reposition: u64,
    consecutive_faults: u32,
    /// Restarts in a row that produced no frame
    empty_restarts: u32,
}

impl DecodeLoop {
    pub fn new(decoder: Box<dyn Decoder>, shared: Arc<PanelShared>, tuning: PlaybackTuning, label: String) -> Self {
        Self {
            decoder,
            shared,
            tuning,
            label,
            state: DecodeState::Idle,
            settle_floor: None,
            last_queued: None,
            frames_since_reposition: 0,
            consecutive_faults: 0,
            empty_restarts: 0,
        }
    }

    pub fn run(mut self) {
        tracing::info!("Decode thread started: {} ({})", self.label, self.decoder.name());
        self.state = DecodeState::Reading;

        while self.shared.transport.is_running() {
            self.step();
        }

        tracing::info!("Decode thread finished: {}", self.label);
    }

    #[cfg(test)]
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// One pass of the loop
    pub fn step(&mut self) {
        let poll = self.tuning.poll_interval();
        let shared = &self.shared;

        if shared.transport.is_paused() {
            shared.transport.wait_while_paused(poll);
            return;
        }

        if shared.queue.is_full() {
            shared.queue.wait_for_space(poll);
            return;
        }

        if let Some(request) = shared.seek.take() {
            tracing::debug!("{}: seek to {:.3}s (accurate: {})", self.label, request.target, request.accurate);
            self.reposition(request.target, request.accurate);
            self.state = DecodeState::SeekPending;
            return;
        }

        let tolerance = self.tuning.segment_tolerance;
        let jump = shared.segments.read().next_time(shared.playhead.position(), tolerance);
        if let Some(target) = jump {
            tracing::debug!(
                "{}: segment jump {:.3}s -> {:.3}s",
                self.label,
                shared.playhead.position(),
                target
            );
            self.reposition(target, true);
            self.state = DecodeState::SegmentJump;
            return;
        }

        match self.state {
            DecodeState::WindowEnd { pts } => {
                // The table may have changed since the frame was held.
                let next = shared.segments.read().next_time(pts, tolerance);
                let target = match next {
                    Some(target) => target,
                    None => {
                        self.state = DecodeState::Reading;
                        return;
                    }
                };
                if self.drained() {
                    tracing::debug!("{}: segment end, jumping to {:.3}s", self.label, target);
                    self.reposition(target, true);
                    self.state = DecodeState::SegmentJump;
                } else {
                    shared.queue.wait_until_empty(poll);
                }
                return;
            }
            DecodeState::Exhausted => {
                if self.drained() {
                    self.restart();
                } else {
                    shared.queue.wait_until_empty(poll);
                }
                return;
            }
            _ => {}
        }

        self.read_frame();
    }

    fn read_frame(&mut self) {
        let frame = match self.decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("{}: end of stream after {} frames", self.label, self.frames_since_reposition);
                self.state = DecodeState::Exhausted;
                return;
            }
            Err(e) => {
                self.recover(e);
                return;
            }
        };

        self.consecutive_faults = 0;
        self.empty_restarts = 0;
        self.frames_since_reposition += 1;

        if let Some(floor) = self.settle_floor {
            if frame.pts < floor {
                tracing::trace!("{}: settle drop {:.3}s < {:.3}s", self.label, frame.pts, floor);
                self.shared.counters.frames_discarded.fetch_add(1, Ordering::Relaxed);
                return;
            }
            self.settle_floor = None;
        }

        let outside = self
            .shared
            .segments
            .read()
            .next_time(frame.pts, self.tuning.segment_tolerance);
        if outside.is_some() {
            self.state = DecodeState::WindowEnd { pts: frame.pts };
            return;
        }

        let pts = frame.pts;
        if self.shared.queue.push(frame) {
            self.last_queued = Some(pts);
            self.state = DecodeState::Reading;
            tracing::trace!("{}: queued {:.3}s", self.label, pts);
        }
    }

    /// Every queued frame has reached the sink
    fn drained(&self) -> bool {
        if !self.shared.queue.is_empty() {
            return false;
        }
        match self.last_queued {
            Some(pts) => self.shared.playhead.position() >= pts,
            None => true,
        }
    }

    /// Loop back to the first segment, or to zero
    fn restart(&mut self) {
        if self.frames_since_reposition == 0 {
            // Nothing decodable at the restart point.
            self.empty_restarts = self.empty_restarts.saturating_add(1);
            self.backoff(self.empty_restarts);
        }
        let target = self.shared.segments.read().restart_point();
        tracing::debug!("{}: looping to {:.3}s", self.label, target);
        self.reposition(target, true);
    }

    fn recover(&mut self, error: DecodeError) {
        self.consecutive_faults = self.consecutive_faults.saturating_add(1);
        self.shared.counters.decode_faults.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "{}: decode fault ({} in a row): {}",
            self.label,
            self.consecutive_faults,
            error
        );

        if self.consecutive_faults > 1 {
            self.backoff(self.consecutive_faults);
        }

        let target = self.shared.segments.read().restart_point();
        self.reposition(target, true);
    }

    /// Sleep `attempts` poll intervals, up to the cap
    fn backoff(&self, attempts: u32) {
        thread::sleep(self.tuning.poll_interval() * attempts.min(MAX_BACKOFF));
    }

    /// Seek the decoder, flush the queue, and move the playhead to `target`
    fn reposition(&mut self, target: f64, accurate: bool) {
        let target = target.max(0.0);

        if let Err(e) = self.decoder.seek(target) {
            self.consecutive_faults = self.consecutive_faults.saturating_add(1);
            self.shared.counters.decode_faults.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("{}: seek fault ({} in a row): {}", self.label, self.consecutive_faults, e);
        }

        let generation = self.shared.queue.clear();
        self.shared.playhead.reset(target, generation);
        self.shared.counters.seeks.fetch_add(1, Ordering::Relaxed);

        self.settle_floor = accurate.then(|| target - self.tuning.segment_tolerance);
        self.last_queued = None;
        self.frames_since_reposition = 0;
        self.state = DecodeState::Reading;
    }
}
