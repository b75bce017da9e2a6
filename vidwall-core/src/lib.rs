//! # Vidwall Core
//!
//! Multi-source video playback: one decode thread and one timing thread per
//! source, a bounded frame queue between them, and seek / segment control.

// ============================================================================
// Frames / Decoders
// ============================================================================
pub mod frame_queue;
pub mod decode;
pub mod ffmpeg;
pub mod pattern;

// ============================================================================
// Playback Core
// ============================================================================
pub mod segments;
pub mod sync;
pub mod sink;
mod decode_loop;
mod timing;
pub mod player;

// ============================================================================
// Wall / Configuration
// ============================================================================
pub mod config;
pub mod wall;

pub use config::{ConfigError, PlaybackTuning, WallConfig};
pub use decode::{open_decoder, DecodeError, Decoder, DecoderOptions, StreamInfo};
pub use frame_queue::{Frame, PixelFormat};
pub use player::{format_time, PanelError, PanelOptions, PanelStats, VideoPanel, SEEK_STEP_SECONDS};
pub use segments::{Segment, SegmentTable};
pub use sink::{NullSink, PresentationSink};
pub use wall::{SourceId, VideoWall};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
