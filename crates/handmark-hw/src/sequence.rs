//! Still images as a frame source.

use crate::{CaptureError, Frame, FrameSource};
use image::ImageFormat;
use std::path::{Path, PathBuf};

/// Frames decoded from a single image file or every image in a directory.
///
/// Directory entries are visited in file name order; files the `image` crate does not
/// recognize by extension are skipped.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CaptureError::DeviceNotFound(path.display().to_string()));
        }

        let paths = if path.is_dir() {
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(path)? {
                let entry_path = entry?.path();
                if entry_path.is_file() && ImageFormat::from_path(&entry_path).is_ok() {
                    paths.push(entry_path);
                }
            }
            paths.sort();
            paths
        } else {
            vec![path.to_path_buf()]
        };

        if paths.is_empty() {
            return Err(CaptureError::NoImages(path.display().to_string()));
        }

        tracing::info!(source = %path.display(), images = paths.len(), "opened image sequence");
        Ok(Self { paths, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Images in visiting order; a frame's `sequence` indexes into this.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Path of the image the next call to [`FrameSource::next_frame`] will decode.
    pub fn peek_path(&self) -> Option<&Path> {
        self.paths.get(self.next).map(PathBuf::as_path)
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let sequence = self.next as u32;
        self.next += 1;

        let image = image::open(path)
            .map_err(|source| CaptureError::Decode {
                path: path.display().to_string(),
                source,
            })?
            .to_rgb8();

        tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "decoded image");
        Ok(Some(Frame::new(image, sequence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("handmark-hw-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_directory_sorted_and_filtered() {
        let dir = scratch_dir("sorted");
        RgbImage::from_pixel(4, 2, Rgb([1, 2, 3])).save(dir.join("b.png")).unwrap();
        RgbImage::from_pixel(2, 2, Rgb([9, 9, 9])).save(dir.join("a.png")).unwrap();
        std::fs::write(dir.join("notes.txt"), "not an image").unwrap();

        let mut seq = ImageSequence::open(&dir).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.peek_path().unwrap().file_name().unwrap(), "a.png");

        let first = seq.next_frame().unwrap().unwrap();
        assert_eq!(first.image.dimensions(), (2, 2));
        assert_eq!(first.sequence, 0);

        let second = seq.next_frame().unwrap().unwrap();
        assert_eq!(*second.image.get_pixel(0, 0), Rgb([1, 2, 3]));
        assert_eq!(second.sequence, 1);

        assert!(seq.next_frame().unwrap().is_none());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_single_file() {
        let dir = scratch_dir("single");
        let file = dir.join("hand.png");
        RgbImage::new(3, 3).save(&file).unwrap();

        let mut seq = ImageSequence::open(&file).unwrap();
        assert_eq!(seq.len(), 1);
        assert!(seq.next_frame().unwrap().is_some());
        assert!(seq.next_frame().unwrap().is_none());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory() {
        let dir = scratch_dir("empty");
        assert!(matches!(ImageSequence::open(&dir), Err(CaptureError::NoImages(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_path() {
        assert!(matches!(
            ImageSequence::open("/nonexistent/handmark/frames"),
            Err(CaptureError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_image_is_decode_error() {
        let dir = scratch_dir("corrupt");
        std::fs::write(dir.join("broken.png"), b"definitely not a png").unwrap();

        let mut seq = ImageSequence::open(&dir).unwrap();
        assert!(matches!(seq.next_frame(), Err(CaptureError::Decode { .. })));
        // The bad file is consumed; the source is now exhausted.
        assert!(seq.next_frame().unwrap().is_none());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
