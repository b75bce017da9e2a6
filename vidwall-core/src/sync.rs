//! Shared playback state between a panel's threads.
//!
//! Each value here is guarded on its own: no function in this module takes
//! more than one lock, and none calls out while holding a lock except
//! [`Playhead::release`], which runs the sink delivery under the playhead lock.

use crate::frame_queue::Frame;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ============================================================================
// Playback Clock
// ============================================================================

/// Wall-clock anchor for one run of contiguous frames.
///
/// Anchored to `(instant, pts)`: a frame is due once
/// `anchor_pts + (now - instant) >= frame.pts`. Owned by the timing thread.
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    anchor: Option<(Instant, f64)>,
    generation: u64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor_at(&mut self, now: Instant, pts: f64, generation: u64) {
        self.anchor = Some((now, pts));
        self.generation = generation;
    }

    pub fn reset(&mut self) {
        self.anchor = None;
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }

    /// True when anchored for the given queue generation
    pub fn is_synced_to(&self, generation: u64) -> bool {
        self.anchor.is_some() && self.generation == generation
    }

    /// Stream position at `now`, if anchored
    pub fn position_at(&self, now: Instant) -> Option<f64> {
        self.anchor
            .map(|(instant, pts)| pts + now.saturating_duration_since(instant).as_secs_f64())
    }

    /// Time left until `pts` is due. Zero when due or when not anchored.
    pub fn remaining_at(&self, pts: f64, now: Instant) -> Duration {
        match self.position_at(now) {
            Some(position) if pts > position => Duration::from_secs_f64(pts - position),
            _ => Duration::ZERO,
        }
    }
}

// ============================================================================
// Transport State
// ============================================================================

/// Running and paused flags, plus a wake-up for threads parked while paused
pub struct TransportState {
    running: AtomicBool,
    paused: AtomicBool,
    gate: Mutex<()>,
    wake: Condvar,
}

impl TransportState {
    pub fn new(paused: bool) -> Self {
        Self {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(paused),
            gate: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Set the paused flag. Returns the previous value.
    pub fn set_paused(&self, paused: bool) -> bool {
        let previous = self.paused.swap(paused, Ordering::AcqRel);
        if !paused {
            self.notify();
        }
        previous
    }

    /// Flip the paused flag. Returns the new value.
    pub fn toggle(&self) -> bool {
        let paused = !self.paused.fetch_xor(true, Ordering::AcqRel);
        if !paused {
            self.notify();
        }
        paused
    }

    /// Clear the running flag and wake anything parked here
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.notify();
    }

    /// Park for at most `timeout` while paused.
    ///
    /// Returns true when the caller should do work (running and not paused).
    pub fn wait_while_paused(&self, timeout: Duration) -> bool {
        let mut gate = self.gate.lock();
        if self.is_paused() && self.is_running() {
            self.wake.wait_for(&mut gate, timeout);
        }
        !self.is_paused() && self.is_running()
    }

    fn notify(&self) {
        // Taking the gate orders this wake after any waiter's flag check.
        let _gate = self.gate.lock();
        self.wake.notify_all();
    }
}

// ============================================================================
// Playhead
// ============================================================================

struct PlayheadState {
    generation: u64,
    open: bool,
}

/// The externally visible current position.
///
/// Written by the decode thread on seek (`reset`) and by the timing thread
/// when a frame is released (`release`). Both writes go through one lock and
/// are tagged with the frame-queue generation, so a frame popped just before
/// a flush can neither overwrite the new position nor reach the sink.
/// Readers use the atomic mirror and never block.
pub struct Playhead {
    state: Mutex<PlayheadState>,
    pts_bits: AtomicU64,
}

impl Playhead {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlayheadState {
                generation: 0,
                open: true,
            }),
            pts_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Current position in seconds
    pub fn position(&self) -> f64 {
        f64::from_bits(self.pts_bits.load(Ordering::Acquire))
    }

    /// Jump the position to `pts` for a new queue generation
    pub fn reset(&self, pts: f64, generation: u64) {
        let mut state = self.state.lock();
        state.generation = generation;
        self.pts_bits.store(pts.to_bits(), Ordering::Release);
    }

    /// Advance to a released frame's PTS and run `deliver`.
    ///
    /// Refused (returns false, `deliver` not called) when the frame belongs
    /// to an older generation or the playhead has been closed.
    pub fn release<F: FnOnce()>(&self, pts: f64, generation: u64, deliver: F) -> bool {
        let state = self.state.lock();
        if !state.open || state.generation != generation {
            return false;
        }
        self.pts_bits.store(pts.to_bits(), Ordering::Release);
        deliver();
        true
    }

    /// Refuse every later release. Waits up to `timeout` for an in-flight
    /// delivery; returns false if it did not finish in time.
    pub fn close(&self, timeout: Duration) -> bool {
        match self.state.try_lock_for(timeout) {
            Some(mut state) => {
                state.open = false;
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl Default for Playhead {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Seek Slot
// ============================================================================

/// A pending relocation of the decode position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    /// Target in seconds
    pub target: f64,
    /// Run the settle pass: discard decoded frames before the target
    pub accurate: bool,
}

/// Single pending seek, last write wins.
#[derive(Default)]
pub struct SeekSlot {
    pending: Mutex<Option<SeekRequest>>,
}

impl SeekSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, request: SeekRequest) {
        *self.pending.lock() = Some(request);
    }

    /// Read and clear the pending request
    pub fn take(&self) -> Option<SeekRequest> {
        self.pending.lock().take()
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

// ============================================================================
// Current Frame Slot
// ============================================================================

/// Latest released frame, for rendering paths that poll
#[derive(Default)]
pub struct FrameSlot {
    frame: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        *self.frame.lock() = Some(frame);
    }

    pub fn latest(&self) -> Option<Frame> {
        self.frame.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_queue::PixelFormat;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_clock_due_after_elapsed() {
        let mut clock = PlaybackClock::new();
        let t0 = Instant::now();
        assert_eq!(clock.remaining_at(5.0, t0), Duration::ZERO);

        clock.anchor_at(t0, 2.0, 3);
        assert!(clock.is_synced_to(3));
        assert!(!clock.is_synced_to(4));

        let remaining = clock.remaining_at(2.5, t0);
        assert!((remaining.as_secs_f64() - 0.5).abs() < 1e-6);

        let later = t0 + Duration::from_millis(600);
        assert_eq!(clock.remaining_at(2.5, later), Duration::ZERO);
        assert!((clock.position_at(later).unwrap() - 2.6).abs() < 1e-6);

        clock.reset();
        assert!(!clock.is_anchored());
    }

    #[test]
    fn test_pause_is_idempotent() {
        let transport = TransportState::new(false);
        assert!(!transport.set_paused(true));
        assert!(transport.set_paused(true));
        assert!(transport.is_paused());

        assert!(!transport.toggle());
        assert!(transport.toggle());
        assert!(transport.is_paused());
    }

    #[test]
    fn test_wait_while_paused_wakes_on_play() {
        let transport = Arc::new(TransportState::new(true));
        let waiter = {
            let transport = transport.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let ready = transport.wait_while_paused(Duration::from_secs(5));
                (ready, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        transport.set_paused(false);

        let (ready, waited) = waiter.join().unwrap();
        assert!(ready);
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn test_shutdown_wakes_paused_waiter() {
        let transport = Arc::new(TransportState::new(true));
        let waiter = {
            let transport = transport.clone();
            thread::spawn(move || transport.wait_while_paused(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        transport.shutdown();

        assert!(!waiter.join().unwrap());
        assert!(!transport.is_running());
    }

    #[test]
    fn test_playhead_refuses_stale_generation() {
        let playhead = Playhead::new();
        assert!(playhead.release(0.04, 0, || {}));
        assert_eq!(playhead.position(), 0.04);

        playhead.reset(15.0, 1);
        let mut delivered = false;
        assert!(!playhead.release(0.08, 0, || delivered = true));
        assert!(!delivered);
        assert_eq!(playhead.position(), 15.0);

        assert!(playhead.release(15.02, 1, || delivered = true));
        assert!(delivered);
    }

    #[test]
    fn test_closed_playhead_refuses_release() {
        let playhead = Playhead::new();
        assert!(playhead.close(Duration::from_millis(10)));
        assert!(!playhead.is_open());
        assert!(!playhead.release(1.0, 0, || panic!("delivered after close")));
    }

    #[test]
    fn test_seek_slot_last_write_wins() {
        let slot = SeekSlot::new();
        slot.request(SeekRequest { target: 3.0, accurate: true });
        slot.request(SeekRequest { target: 7.0, accurate: false });
        assert!(slot.is_pending());

        let taken = slot.take().unwrap();
        assert_eq!(taken.target, 7.0);
        assert!(!taken.accurate);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_frame_slot_publish() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        slot.publish(Frame::new(vec![1, 2, 3], 1, 1, PixelFormat::Rgb24, 0.5));
        let latest = slot.latest().unwrap();
        assert_eq!(latest.pts, 0.5);
        assert_eq!(&latest.data[..], &[1, 2, 3]);
    }
}
