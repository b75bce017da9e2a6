//! # Video Panel
//!
//! One opened source: a decoder, a bounded frame queue, and the two threads
//! that move frames through it.
//!
//! ```text
//! Decoder → [decode thread] → FrameQueue → [timing thread] → PresentationSink
//!                  ↑                              ↓
//!              SeekSlot                       Playhead
//!                  ↑                              ↓
//!              VideoPanel (play / pause / seek / position)
//! ```
//!
//! The panel never touches the decoder or the queue contents itself. It
//! writes requests into shared state and both threads pick them up on their
//! next iteration.

use crate::config::PlaybackTuning;
use crate::decode::{open_decoder, DecodeError, Decoder, DecoderOptions, StreamInfo};
use crate::decode_loop::DecodeLoop;
use crate::frame_queue::{Frame, FrameQueue};
use crate::segments::SegmentTable;
use crate::sink::PresentationSink;
use crate::sync::{FrameSlot, Playhead, SeekRequest, SeekSlot, TransportState};
use crate::timing::TimingLoop;
use parking_lot::{Mutex, RwLock};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Step used by skip-forward / skip-back controls
pub const SEEK_STEP_SECONDS: f64 = 3.0;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Failed to open source: {0}")]
    Open(#[from] DecodeError),
    #[error("Failed to start playback thread: {0}")]
    Spawn(#[source] io::Error),
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Default)]
pub(crate) struct PanelCounters {
    pub frames_delivered: AtomicU64,
    pub frames_discarded: AtomicU64,
    pub decode_faults: AtomicU64,
    pub seeks: AtomicU64,
}

/// Everything both threads and the panel handle see
pub(crate) struct PanelShared {
    pub queue: FrameQueue,
    pub transport: TransportState,
    pub playhead: Playhead,
    pub seek: SeekSlot,
    pub segments: RwLock<SegmentTable>,
    pub current_frame: FrameSlot,
    pub counters: PanelCounters,
}

impl PanelShared {
    pub fn new(tuning: &PlaybackTuning, segments: SegmentTable, start_paused: bool) -> Self {
        Self {
            queue: FrameQueue::new(tuning.buffer_capacity),
            transport: TransportState::new(start_paused),
            playhead: Playhead::new(),
            seek: SeekSlot::new(),
            segments: RwLock::new(segments),
            current_frame: FrameSlot::new(),
            counters: PanelCounters::default(),
        }
    }
}

// ============================================================================
// Options / Stats
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PanelOptions {
    pub decoder: DecoderOptions,
    pub segments: SegmentTable,
    pub tuning: PlaybackTuning,
    /// Open without releasing frames until `play`
    pub start_paused: bool,
}

/// Playback statistics for one panel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelStats {
    pub frames_delivered: u64,
    /// Frames dropped by the settle pass or by a flush racing their release
    pub frames_discarded: u64,
    pub decode_faults: u64,
    pub seeks: u64,
    pub buffered_frames: usize,
}

// ============================================================================
// Video Panel
// ============================================================================

pub struct VideoPanel {
    label: String,
    info: StreamInfo,
    shared: Arc<PanelShared>,
    join_timeout: Duration,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
    timing_thread: Mutex<Option<JoinHandle<()>>>,
    /// The thread that runs the sink
    timing_thread_id: ThreadId,
    stopped: AtomicBool,
}

impl VideoPanel {
    /// Open `path` and start playing it into `sink`.
    ///
    /// Fails synchronously when the decoder cannot open the source.
    pub fn open(
        path: &Path,
        options: PanelOptions,
        sink: Arc<dyn PresentationSink>,
    ) -> Result<Self, PanelError> {
        let decoder = open_decoder(path, &options.decoder)?;
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::with_decoder(label, decoder, options, sink)
    }

    /// Start playback from an already-open decoder
    pub fn with_decoder(
        label: impl Into<String>,
        decoder: Box<dyn Decoder>,
        options: PanelOptions,
        sink: Arc<dyn PresentationSink>,
    ) -> Result<Self, PanelError> {
        let label = label.into();
        let info = decoder.info().clone();
        let tuning = options.tuning;
        let shared = Arc::new(PanelShared::new(&tuning, options.segments, options.start_paused));

        tracing::info!(
            "Panel {} open: {} {}x{} ({:?}) @ {:.2} fps, {}",
            label,
            decoder.name(),
            info.width,
            info.height,
            info.orientation(),
            info.frame_rate,
            format_time(info.duration)
        );

        let decode_loop = DecodeLoop::new(decoder, shared.clone(), tuning.clone(), label.clone());
        let decode_thread = thread::Builder::new()
            .name(format!("vidwall-decode-{}", label))
            .spawn(move || decode_loop.run())
            .map_err(PanelError::Spawn)?;

        let timing_loop = TimingLoop::new(shared.clone(), sink, tuning.clone(), label.clone());
        let timing_thread = match thread::Builder::new()
            .name(format!("vidwall-timing-{}", label))
            .spawn(move || timing_loop.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                shared.transport.shutdown();
                shared.queue.stop();
                let _ = decode_thread.join();
                return Err(PanelError::Spawn(e));
            }
        };

        Ok(Self {
            label,
            info,
            shared,
            join_timeout: tuning.join_timeout(),
            timing_thread_id: timing_thread.thread().id(),
            decode_thread: Mutex::new(Some(decode_thread)),
            timing_thread: Mutex::new(Some(timing_thread)),
            stopped: AtomicBool::new(false),
        })
    }

    // ========================================================================
    // Transport
    // ========================================================================

    pub fn play(&self) {
        if self.shared.transport.set_paused(false) {
            tracing::debug!("Panel {} resumed", self.label);
        }
    }

    pub fn pause(&self) {
        if !self.shared.transport.set_paused(true) {
            tracing::debug!("Panel {} paused at {:.3}s", self.label, self.current_position());
        }
    }

    /// Flip play/pause. Returns true if now paused.
    pub fn toggle(&self) -> bool {
        self.shared.transport.toggle()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.transport.is_paused()
    }

    /// Seek to `target` seconds, discarding frames decoded before it
    pub fn request_seek(&self, target: f64) {
        self.submit_seek(target, true);
    }

    /// Seek to `target` seconds, keeping whatever the decoder lands on
    pub fn request_seek_coarse(&self, target: f64) {
        self.submit_seek(target, false);
    }

    /// Seek by `delta` seconds from the current position. Returns the target.
    pub fn seek_relative(&self, delta: f64) -> f64 {
        let target = relative_target(self.current_position(), delta, self.duration());
        self.request_seek(target);
        target
    }

    fn submit_seek(&self, target: f64, accurate: bool) {
        if !target.is_finite() {
            tracing::warn!("Panel {}: ignoring seek to {}", self.label, target);
            return;
        }
        let target = target.max(0.0);
        tracing::debug!("Panel {} seek requested: {:.3}s (accurate: {})", self.label, target, accurate);
        self.shared.seek.request(SeekRequest { target, accurate });
    }

    /// Replace the segment table; the decode thread applies it on its next pass
    pub fn set_segments(&self, segments: SegmentTable) {
        tracing::debug!("Panel {}: {} segments", self.label, segments.len());
        *self.shared.segments.write() = segments;
    }

    pub fn segments(&self) -> SegmentTable {
        self.shared.segments.read().clone()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current position in seconds
    pub fn current_position(&self) -> f64 {
        self.shared.playhead.position()
    }

    pub fn current_position_ms(&self) -> i64 {
        (self.current_position() * 1000.0).round() as i64
    }

    /// Whole seconds played
    pub fn current_second(&self) -> u64 {
        self.current_position().max(0.0).floor() as u64
    }

    pub fn duration(&self) -> f64 {
        self.info.duration
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Most recently released frame
    pub fn latest_frame(&self) -> Option<Frame> {
        self.shared.current_frame.latest()
    }

    pub fn stats(&self) -> PanelStats {
        let counters = &self.shared.counters;
        PanelStats {
            frames_delivered: counters.frames_delivered.load(Ordering::Relaxed),
            frames_discarded: counters.frames_discarded.load(Ordering::Relaxed),
            decode_faults: counters.decode_faults.load(Ordering::Relaxed),
            seeks: counters.seeks.load(Ordering::Relaxed),
            buffered_frames: self.shared.queue.len(),
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop both threads. Safe to call any number of times from any thread,
    /// including from inside the sink; once it returns the sink receives no
    /// more frames.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!("Stopping panel {}", self.label);
        self.shared.transport.shutdown();
        self.shared.queue.stop();

        let current = thread::current().id();
        if current == self.timing_thread_id {
            // Inside a sink delivery: the playhead lock is already held here,
            // and the timing loop exits on the cleared running flag once the
            // delivery returns.
            tracing::debug!("Panel {} stopped from its sink", self.label);
        } else if !self.shared.playhead.close(self.join_timeout) {
            tracing::warn!("Panel {}: sink delivery still running after {:?}", self.label, self.join_timeout);
        }

        let deadline = Instant::now() + self.join_timeout;
        for (role, slot) in [("decode", &self.decode_thread), ("timing", &self.timing_thread)] {
            let handle = match slot.lock().take() {
                Some(handle) => handle,
                None => continue,
            };
            // A thread cannot join itself; dropping the handle detaches it.
            if handle.thread().id() != current {
                join_until(handle, deadline, &self.label, role);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for VideoPanel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_until(handle: JoinHandle<()>, deadline: Instant, label: &str, role: &str) {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("Panel {}: {} thread did not stop in time, detaching", label, role);
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }

    if handle.join().is_err() {
        tracing::warn!("Panel {}: {} thread panicked", label, role);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Target for a relative seek, clamped to the stream
pub fn relative_target(current: f64, delta: f64, duration: f64) -> f64 {
    let target = current + delta;
    if !target.is_finite() {
        return current.max(0.0);
    }
    let upper = if duration > 0.0 { duration } else { f64::INFINITY };
    target.clamp(0.0, upper)
}

/// Format seconds as `MM:SS`, or `HH:MM:SS` from one hour up
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}
