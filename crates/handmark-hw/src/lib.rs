//! handmark-hw: frame acquisition for hand tracking.
//!
//! Provides V4L2-based camera capture and still-image sources behind a common
//! [`FrameSource`] trait, all producing RGB [`Frame`]s.

pub mod camera;
pub mod frame;
pub mod sequence;

pub use camera::{Camera, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use sequence::ImageSequence;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("frame acquisition failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no images found in {0}")]
    NoImages(String),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A sequence of frames, live or file-backed.
pub trait FrameSource {
    /// Next frame, or `None` once a finite source is exhausted.
    ///
    /// An error means this frame could not be acquired; the caller decides whether to
    /// try again or stop.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).next_frame()
    }
}
