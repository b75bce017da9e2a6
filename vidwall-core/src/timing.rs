//! Timing thread: the consumer side of a panel.
//!
//! Paces frames out of the queue against a wall-clock anchor. The anchor is
//! taken from the first frame seen after start, resume, or a flush, so that
//! frame shows at once instead of waiting for absolute zero.

use crate::config::PlaybackTuning;
use crate::frame_queue::HeadTicket;
use crate::player::PanelShared;
use crate::sink::PresentationSink;
use crate::sync::PlaybackClock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimingState {
    WaitingForFirstFrame,
    Synced,
    Paused,
}

/// Half the remaining time, kept within the tuning's sleep bounds
pub(crate) fn sleep_for(remaining: Duration, tuning: &PlaybackTuning) -> Duration {
    (remaining / 2).clamp(tuning.min_sleep(), tuning.max_sleep())
}

pub(crate) struct TimingLoop {
    shared: Arc<PanelShared>,
    sink: Arc<dyn PresentationSink>,
    tuning: PlaybackTuning,
    label: String,
    clock: PlaybackClock,
    state: TimingState,
}

impl TimingLoop {
    pub fn new(
        shared: Arc<PanelShared>,
        sink: Arc<dyn PresentationSink>,
        tuning: PlaybackTuning,
        label: String,
    ) -> Self {
        Self {
            shared,
            sink,
            tuning,
            label,
            clock: PlaybackClock::new(),
            state: TimingState::WaitingForFirstFrame,
        }
    }

    pub fn run(mut self) {
        tracing::info!("Timing thread started: {}", self.label);

        while self.shared.transport.is_running() {
            if let Some(wait) = self.step(Instant::now()) {
                thread::sleep(wait);
            }
        }

        tracing::info!("Timing thread finished: {}", self.label);
    }

    #[cfg(test)]
    pub fn state(&self) -> TimingState {
        self.state
    }

    /// One pass of the loop. Returns how long to sleep before the next one.
    pub fn step(&mut self, now: Instant) -> Option<Duration> {
        let poll = self.tuning.poll_interval();

        if self.shared.transport.is_paused() {
            if self.state != TimingState::Paused {
                self.clock.reset();
                self.state = TimingState::Paused;
            }
            self.shared.transport.wait_while_paused(poll);
            return None;
        }

        let head = match self.shared.queue.peek() {
            Some(head) => head,
            None => {
                self.shared.queue.wait_for_frame(poll);
                return None;
            }
        };

        if !self.clock.is_synced_to(head.generation) {
            tracing::debug!(
                "{}: clock anchored at {:.3}s (generation {})",
                self.label,
                head.pts,
                head.generation
            );
            self.clock.anchor_at(now, head.pts, head.generation);
            self.state = TimingState::Synced;
        }

        let remaining = self.clock.remaining_at(head.pts, now);
        if remaining.is_zero() {
            self.release(head);
            None
        } else {
            Some(sleep_for(remaining, &self.tuning))
        }
    }

    fn release(&self, head: HeadTicket) {
        let shared = &self.shared;
        let frame = match shared.queue.pop_if(&head) {
            Some(frame) => frame,
            // Flushed since the peek; the new head is picked up next pass.
            None => return,
        };

        let sink = &self.sink;
        let delivered = shared
            .playhead
            .release(frame.pts, head.generation, || sink.on_frame(&frame));

        if delivered {
            tracing::trace!("{}: released {:.3}s", self.label, frame.pts);
            shared.counters.frames_delivered.fetch_add(1, Ordering::Relaxed);
            shared.current_frame.publish(frame);
        } else {
            shared.counters.frames_discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}
