//! Frame type and pixel format conversion for YUYV, packed RGB/BGR, MJPEG.

use image::{ImageFormat, RgbImage};

/// A captured color frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self {
            image,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average pixel brightness over all channels (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let data = self.image.as_raw();
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    into_image(rgb, width, height)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

/// Copy a packed 24-bit RGB buffer into an image.
pub fn rgb24_to_image(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    into_image(buf[..expected].to_vec(), width, height)
}

/// Convert a packed 24-bit BGR buffer to RGB.
pub fn bgr24_to_image(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let mut image = rgb24_to_image(buf, width, height)?;
    for pixel in image.pixels_mut() {
        pixel.0.swap(0, 2);
    }
    Ok(image)
}

/// Decode one MJPEG frame.
pub fn decode_mjpeg(buf: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8())
}

fn into_image(data: Vec<u8>, width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let actual = data.len();
    RgbImage::from_raw(width, height, data).ok_or(FrameError::InvalidLength {
        expected: (width * height * 3) as usize,
        actual,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_to_rgb_gray_levels() {
        // 2x1 image: black (Y=16) and white (Y=235), neutral chroma
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_to_rgb_mid_gray() {
        let yuyv = vec![126, 128, 126, 128, 126, 128, 126, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 2).unwrap();
        assert_eq!(rgb.dimensions(), (2, 2));
        assert!(rgb.pixels().all(|p| *p == Rgb([128, 128, 128])));
    }

    #[test]
    fn test_yuyv_to_rgb_red_dominant() {
        // Strong V (Cr) pushes red up and green down.
        let yuyv = vec![81, 90, 81, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let p = rgb.get_pixel(0, 0);
        assert!(p[0] > 200, "red: {}", p[0]);
        assert!(p[1] < 60, "green: {}", p[1]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(matches!(
            yuyv_to_rgb(&yuyv, 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_bgr24_swaps_channels() {
        let bgr = vec![1, 2, 3, 4, 5, 6];
        let rgb = bgr24_to_image(&bgr, 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([3, 2, 1]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([6, 5, 4]));
    }

    #[test]
    fn test_rgb24_short_buffer() {
        assert!(rgb24_to_image(&[0; 5], 2, 1).is_err());
    }

    #[test]
    fn test_decode_mjpeg_roundtrip() {
        let src = RgbImage::from_pixel(8, 8, Rgb([200, 40, 40]));
        let mut jpeg = Vec::new();
        src.write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let decoded = decode_mjpeg(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (8, 8));
        let p = decoded.get_pixel(4, 4);
        assert!(p[0] > 150 && p[1] < 100);
    }

    #[test]
    fn test_decode_mjpeg_garbage() {
        assert!(matches!(decode_mjpeg(&[0, 1, 2, 3]), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame::new(RgbImage::from_pixel(4, 4, Rgb([30, 60, 90])), 0);
        assert!((frame.avg_brightness() - 60.0).abs() < 1e-4);
        assert_eq!((frame.width(), frame.height()), (4, 4));
    }
}
