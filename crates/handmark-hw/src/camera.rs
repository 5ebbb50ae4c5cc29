//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::{CaptureError, FrameSource};
use image::RgbImage;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Number of mmap buffers queued with the driver.
const STREAM_BUFFERS: u32 = 4;
/// Mean brightness below which a settled frame is reported as too dark.
const DARK_FRAME_BRIGHTNESS: f32 = 20.0;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion JPEG, one JPEG per buffer.
    Mjpeg,
    /// Packed 24-bit RGB.
    Rgb24,
    /// Packed 24-bit BGR.
    Bgr24,
}

impl PixelFormat {
    /// Formats in order of preference.
    const PREFERENCE: [PixelFormat; 4] = [
        PixelFormat::Yuyv,
        PixelFormat::Mjpeg,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
    ];

    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        }
    }

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|f| f.fourcc() == fourcc)
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    /// Negotiated pixel format.
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") at roughly the requested size.
    ///
    /// The driver may pick a different resolution; the negotiated one is in `width`/`height`.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CaptureError> {
        if !Path::new(device_path).exists() {
            return Err(CaptureError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CaptureError::DeviceBusy
            } else {
                CaptureError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CaptureError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CaptureError::StreamingNotSupported);
        }

        // Ask for each supported format in turn and take the first one the driver keeps.
        let mut fmt = device.format().map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        let mut negotiated = None;
        for wanted in PixelFormat::PREFERENCE {
            fmt.fourcc = wanted.fourcc();
            fmt.width = width;
            fmt.height = height;

            let got = device.set_format(&fmt).map_err(|e| {
                CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;
            if let Some(pixel_format) = PixelFormat::from_fourcc(got.fourcc) {
                negotiated = Some((got, pixel_format));
                break;
            }
            tracing::debug!(requested = ?wanted, got = ?got.fourcc, "format rejected by driver");
        }

        let Some((negotiated, pixel_format)) = negotiated else {
            return Err(CaptureError::FormatNegotiationFailed(
                "no supported pixel format (need YUYV, MJPG, RGB3, or BGR3)".to_string(),
            ));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            stream: None,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Capture a single frame, converted to RGB.
    ///
    /// The mmap stream is started on first use and kept for subsequent frames.
    pub fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| {
                    CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CaptureError::CaptureFailed("stream not started".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };
        let sequence = meta.sequence;

        let image = buf_to_rgb(self.pixel_format, payload, self.width, self.height)?;
        Ok(Frame::new(image, sequence))
    }

    /// Capture and drop `count` frames so auto exposure can settle.
    ///
    /// Returns the mean brightness of the last warmup frame, if any was captured.
    pub fn discard_frames(&mut self, count: usize) -> Option<f32> {
        let mut last = None;
        for i in 0..count {
            match self.capture_frame() {
                Ok(frame) => {
                    let brightness = frame.avg_brightness();
                    tracing::debug!(frame = i, brightness, "discarded warmup frame");
                    last = Some(brightness);
                }
                Err(e) => tracing::debug!(error = %e, "warmup capture failed"),
            }
        }
        if let Some(brightness) = last.filter(|&b| too_dark(b)) {
            tracing::warn!(brightness, "camera image still very dark after warmup");
        }
        last
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.capture_frame().map(Some)
    }
}

fn too_dark(brightness: f32) -> bool {
    brightness < DARK_FRAME_BRIGHTNESS
}

/// Convert a raw buffer to RGB based on the negotiated format.
fn buf_to_rgb(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<RgbImage, CaptureError> {
    let image = match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
        PixelFormat::Rgb24 => frame::rgb24_to_image(buf, width, height),
        PixelFormat::Bgr24 => frame::bgr24_to_image(buf, width, height),
        PixelFormat::Mjpeg => frame::decode_mjpeg(buf),
    }
    .map_err(|e| CaptureError::CaptureFailed(format!("{format:?} conversion failed: {e}")))?;

    if image.dimensions() != (width, height) {
        return Err(CaptureError::CaptureFailed(format!(
            "frame is {}x{}, expected {width}x{height}",
            image.width(),
            image.height()
        )));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/handmark-does-not-exist", 640, 480)
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
    }

    #[test]
    fn test_fourcc_roundtrip() {
        for format in PixelFormat::PREFERENCE {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), None);
    }

    #[test]
    fn test_buf_to_rgb_yuyv() {
        let image = buf_to_rgb(PixelFormat::Yuyv, &[235, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_buf_to_rgb_short_buffer_is_capture_failure() {
        let err = buf_to_rgb(PixelFormat::Rgb24, &[0; 4], 2, 2).unwrap_err();
        assert!(matches!(err, CaptureError::CaptureFailed(_)));
    }

    #[test]
    fn test_buf_to_rgb_mjpeg_size_mismatch() {
        let src = RgbImage::new(4, 4);
        let mut jpeg = Vec::new();
        src.write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();
        let err = buf_to_rgb(PixelFormat::Mjpeg, &jpeg, 8, 8).unwrap_err();
        assert!(matches!(err, CaptureError::CaptureFailed(_)));
        assert!(buf_to_rgb(PixelFormat::Mjpeg, &jpeg, 4, 4).is_ok());
    }

    #[test]
    fn test_too_dark_uses_frame_brightness() {
        let black = Frame::new(RgbImage::new(4, 4), 0);
        let lit = Frame::new(RgbImage::from_pixel(4, 4, image::Rgb([90, 120, 60])), 1);
        assert!(too_dark(black.avg_brightness()));
        assert!(!too_dark(lit.avg_brightness()));
    }

    #[test]
    fn test_list_devices_does_not_panic() {
        let devices = Camera::list_devices();
        assert!(devices.iter().all(|d| d.path.starts_with("/dev/video")));
    }
}
