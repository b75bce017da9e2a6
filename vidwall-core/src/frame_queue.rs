//! # Frame Queue - Bounded Hand-off Between Decode and Timing
//!
//! The only structure shared between a panel's decode thread and its
//! timing thread that needs a queue-level lock:
//! - Bounded FIFO of decoded frames (backpressure instead of growth)
//! - Head inspection without removal, then conditional removal
//! - Generation counter bumped on every flush so a stale head can't be popped
//! - Stop path that drains and wakes every waiter
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  push   ┌────────────┐  peek / pop_if  ┌──────────┐
//! │ Decode   │────────►│ FrameQueue │◄────────────────│ Timing   │
//! │ Thread   │         │ (bounded)  │                 │ Thread   │
//! └──────────┘         └────────────┘                 └──────────┘
//!                            ▲
//!                     clear (seek) / stop
//! ```

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Default number of decoded frames buffered ahead of the timing thread.
pub const DEFAULT_CAPACITY: usize = 6;

// ============================================================================
// Frame Data
// ============================================================================

/// Pixel format for frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel
    Rgb24,
    /// Packed 8-bit RGBA, 4 bytes per pixel
    Rgba32,
    /// 4:2:0 semi-planar
    Nv12,
    /// 4:2:0 planar
    Yuv420p,
}

impl PixelFormat {
    /// Calculate buffer size for this format
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let w = width as usize;
        let h = height as usize;
        match self {
            Self::Nv12 | Self::Yuv420p => w * h * 3 / 2,
            Self::Rgb24 => w * h * 3,
            Self::Rgba32 => w * h * 4,
        }
    }
}

/// A decoded video frame.
///
/// Pixel data is reference counted, so cloning a frame into the panel's
/// current-frame slot does not copy pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame pixel data
    pub data: Bytes,
    /// Pixel format
    pub format: PixelFormat,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Presentation timestamp in seconds from stream start
    pub pts: f64,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat, pts: f64) -> Self {
        Self {
            data: data.into(),
            format,
            width,
            height,
            pts,
        }
    }

    /// Presentation timestamp in whole milliseconds
    pub fn pts_ms(&self) -> i64 {
        (self.pts * 1000.0) as i64
    }

    /// True when the buffer holds a full picture for its format and size
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.format.buffer_size(self.width, self.height)
    }
}

// ============================================================================
// Frame Queue
// ============================================================================

/// Handle to the head frame observed by [`FrameQueue::peek`].
///
/// Carries the queue generation at the time of the peek; a flush in between
/// makes the ticket stale and [`FrameQueue::pop_if`] refuses it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadTicket {
    pub pts: f64,
    pub generation: u64,
}

struct Slots {
    frames: VecDeque<Frame>,
    generation: u64,
}

/// Thread-safe bounded frame queue for one playback pipeline
pub struct FrameQueue {
    slots: Mutex<Slots>,
    capacity: usize,

    /// Signaled when a frame is pushed
    frame_available: Condvar,

    /// Signaled when a slot frees up (pop, clear, stop)
    space_available: Condvar,

    stopped: AtomicBool,

    frames_pushed: AtomicU64,
    frames_popped: AtomicU64,
    frames_flushed: AtomicU64,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(Slots {
                frames: VecDeque::with_capacity(capacity),
                generation: 0,
            }),
            capacity,
            frame_available: Condvar::new(),
            space_available: Condvar::new(),
            stopped: AtomicBool::new(false),
            frames_pushed: AtomicU64::new(0),
            frames_popped: AtomicU64::new(0),
            frames_flushed: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Producer API (Decode Thread)
    // ========================================================================

    /// Push a frame, blocking while the queue is full.
    ///
    /// Returns false (and drops the frame) once the queue is stopped.
    pub fn push(&self, frame: Frame) -> bool {
        let mut slots = self.slots.lock();

        while slots.frames.len() >= self.capacity {
            if self.is_stopped() {
                return false;
            }
            self.space_available.wait(&mut slots);
        }

        if self.is_stopped() {
            return false;
        }

        slots.frames.push_back(frame);
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        self.frame_available.notify_one();
        true
    }

    /// Push without blocking. Returns false if full or stopped.
    pub fn try_push(&self, frame: Frame) -> bool {
        let mut slots = self.slots.lock();
        if self.is_stopped() || slots.frames.len() >= self.capacity {
            return false;
        }

        slots.frames.push_back(frame);
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        self.frame_available.notify_one();
        true
    }

    /// Wait up to `timeout` for a free slot.
    ///
    /// Returns true if there is room. Returns early (false) when stopped.
    pub fn wait_for_space(&self, timeout: Duration) -> bool {
        let mut slots = self.slots.lock();
        if slots.frames.len() >= self.capacity && !self.is_stopped() {
            self.space_available.wait_for(&mut slots, timeout);
        }
        slots.frames.len() < self.capacity && !self.is_stopped()
    }

    /// Wait up to `timeout` for the consumer to take every buffered frame.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let mut slots = self.slots.lock();
        if !slots.frames.is_empty() && !self.is_stopped() {
            self.space_available.wait_for(&mut slots, timeout);
        }
        slots.frames.is_empty()
    }

    // ========================================================================
    // Consumer API (Timing Thread)
    // ========================================================================

    /// Inspect the head frame without removing it
    pub fn peek(&self) -> Option<HeadTicket> {
        let slots = self.slots.lock();
        slots.frames.front().map(|f| HeadTicket {
            pts: f.pts,
            generation: slots.generation,
        })
    }

    /// Remove the head frame only if it is still the one `ticket` describes.
    pub fn pop_if(&self, ticket: &HeadTicket) -> Option<Frame> {
        let mut slots = self.slots.lock();
        if slots.generation != ticket.generation {
            return None;
        }
        match slots.frames.front() {
            Some(head) if head.pts == ticket.pts => {}
            _ => return None,
        }

        let frame = slots.frames.pop_front();
        self.frames_popped.fetch_add(1, Ordering::Relaxed);
        self.space_available.notify_one();
        frame
    }

    /// Remove the head frame unconditionally
    #[cfg(test)]
    pub fn pop(&self) -> Option<Frame> {
        let mut slots = self.slots.lock();
        let frame = slots.frames.pop_front();
        if frame.is_some() {
            self.frames_popped.fetch_add(1, Ordering::Relaxed);
            self.space_available.notify_one();
        }
        frame
    }

    /// Wait up to `timeout` for a frame to arrive. Returns true if non-empty.
    pub fn wait_for_frame(&self, timeout: Duration) -> bool {
        let mut slots = self.slots.lock();
        if slots.frames.is_empty() && !self.is_stopped() {
            self.frame_available.wait_for(&mut slots, timeout);
        }
        !slots.frames.is_empty()
    }

    // ========================================================================
    // Control API
    // ========================================================================

    /// Drop every buffered frame and start a new generation.
    ///
    /// Returns the new generation. Tickets issued before the clear are stale.
    pub fn clear(&self) -> u64 {
        let mut slots = self.slots.lock();
        let dropped = slots.frames.len();
        slots.frames.clear();
        slots.generation += 1;
        let generation = slots.generation;
        drop(slots);

        self.frames_flushed.fetch_add(dropped as u64, Ordering::Relaxed);
        self.space_available.notify_all();

        tracing::debug!("Queue flushed: dropped {} frames, generation {}", dropped, generation);
        generation
    }

    /// Stop the queue: refuse further pushes, drain, wake all waiters.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.clear();
        self.frame_available.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Current flush generation
    pub fn generation(&self) -> u64 {
        self.slots.lock().generation
    }

    pub fn len(&self) -> usize {
        self.slots.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let slots = self.slots.lock();
        QueueStats {
            buffered_frames: slots.frames.len(),
            capacity: self.capacity,
            generation: slots.generation,
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_popped: self.frames_popped.load(Ordering::Relaxed),
            frames_flushed: self.frames_flushed.load(Ordering::Relaxed),
            buffer_duration: buffered_span(&slots.frames),
        }
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn buffered_span(frames: &VecDeque<Frame>) -> f64 {
    match (frames.front(), frames.back()) {
        (Some(first), Some(last)) => (last.pts - first.pts).max(0.0),
        _ => 0.0,
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub buffered_frames: usize,
    pub capacity: usize,
    pub generation: u64,
    pub frames_pushed: u64,
    pub frames_popped: u64,
    pub frames_flushed: u64,
    /// PTS span between the oldest and newest buffered frame, seconds
    pub buffer_duration: f64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn frame(pts: f64) -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, PixelFormat::Rgb24, pts)
    }

    #[test]
    fn test_pixel_format_sizes() {
        assert_eq!(PixelFormat::Rgb24.buffer_size(4, 2), 24);
        assert_eq!(PixelFormat::Rgba32.buffer_size(4, 2), 32);
        assert_eq!(PixelFormat::Nv12.buffer_size(4, 2), 12);
        assert!(frame(0.0).is_complete());
        assert_eq!(frame(1.25).pts_ms(), 1250);
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(4);
        assert!(queue.try_push(frame(0.00)));
        assert!(queue.try_push(frame(0.04)));
        assert!(queue.try_push(frame(0.08)));

        assert_eq!(queue.pop().unwrap().pts, 0.00);
        assert_eq!(queue.pop().unwrap().pts, 0.04);
        assert_eq!(queue.pop().unwrap().pts, 0.08);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_bounded_capacity() {
        let queue = FrameQueue::new(3);
        for i in 0..3 {
            assert!(queue.try_push(frame(i as f64)));
        }
        assert!(queue.is_full());
        assert!(!queue.try_push(frame(9.0)));
        assert_eq!(queue.len(), 3);
        assert!(!queue.wait_for_space(Duration::from_millis(5)));
    }

    #[test]
    fn test_clear_then_push_leaves_one() {
        let queue = FrameQueue::new(4);
        for i in 0..4 {
            queue.try_push(frame(i as f64));
        }
        let generation = queue.clear();
        assert_eq!(generation, 1);
        assert!(queue.push(frame(10.0)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().frames_flushed, 4);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let queue = FrameQueue::new(2);
        queue.try_push(frame(0.5));

        let ticket = queue.peek().unwrap();
        assert_eq!(ticket.pts, 0.5);
        assert_eq!(queue.len(), 1);

        let popped = queue.pop_if(&ticket).unwrap();
        assert_eq!(popped.pts, 0.5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stale_ticket_refused_after_clear() {
        let queue = FrameQueue::new(2);
        queue.try_push(frame(3.0));
        let ticket = queue.peek().unwrap();

        queue.clear();
        queue.try_push(frame(3.0));

        assert!(queue.pop_if(&ticket).is_none());
        assert_eq!(queue.len(), 1);
        let fresh = queue.peek().unwrap();
        assert_eq!(fresh.generation, ticket.generation + 1);
        assert!(queue.pop_if(&fresh).is_some());
    }

    #[test]
    fn test_push_blocks_until_pop() {
        let queue = Arc::new(FrameQueue::new(1));
        queue.try_push(frame(0.0));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(frame(1.0)))
        };

        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().pts, 0.0);

        assert!(producer.join().unwrap());
        assert_eq!(queue.pop().unwrap().pts, 1.0);
    }

    #[test]
    fn test_stop_unblocks_producer() {
        let queue = Arc::new(FrameQueue::new(1));
        queue.try_push(frame(0.0));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(frame(1.0)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.stop();

        assert!(!producer.join().unwrap());
        assert!(queue.is_empty());
        assert!(!queue.try_push(frame(2.0)));
    }

    #[test]
    fn test_wait_for_frame_times_out() {
        let queue = FrameQueue::new(2);
        let start = Instant::now();
        assert!(!queue.wait_for_frame(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_stats_buffer_duration() {
        let queue = FrameQueue::new(4);
        queue.try_push(frame(1.0));
        queue.try_push(frame(1.5));
        let stats = queue.stats();
        assert_eq!(stats.buffered_frames, 2);
        assert!((stats.buffer_duration - 0.5).abs() < 1e-9);
    }
}
