//! Presentation sinks: where released frames go.
//!
//! Called on the panel's timing thread. A sink that touches a rendering
//! context must hop to that context's thread itself.

use crate::frame_queue::{Frame, PixelFormat};

pub trait PresentationSink: Send + Sync {
    /// A picture is ready to display
    fn on_frame_ready(&self, pixels: &[u8], width: u32, height: u32, format: PixelFormat);

    /// Full frame hook. Defaults to [`on_frame_ready`](Self::on_frame_ready);
    /// override to see the PTS as well.
    fn on_frame(&self, frame: &Frame) {
        self.on_frame_ready(&frame.data, frame.width, frame.height, frame.format);
    }
}

impl<F> PresentationSink for F
where
    F: Fn(&[u8], u32, u32, PixelFormat) + Send + Sync,
{
    fn on_frame_ready(&self, pixels: &[u8], width: u32, height: u32, format: PixelFormat) {
        self(pixels, width, height, format)
    }
}

/// Discards every frame
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PresentationSink for NullSink {
    fn on_frame_ready(&self, _pixels: &[u8], _width: u32, _height: u32, _format: PixelFormat) {}
}
