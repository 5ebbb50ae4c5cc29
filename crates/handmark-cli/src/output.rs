//! Where annotated frames end up: a live window or image files.

use crate::tracking::{FrameReport, FrameSink, JsonSink};
use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// A minifb window showing annotated frames. Closing it or pressing Esc stops the loop.
pub struct WindowSink {
    window: minifb::Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl WindowSink {
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let mut window = minifb::Window::new(
            title,
            width,
            height,
            minifb::WindowOptions {
                resize: true,
                ..minifb::WindowOptions::default()
            },
        )
        .map_err(|e| anyhow::anyhow!("failed to create window: {e}"))?;

        window.set_target_fps(60);

        Ok(Self {
            window,
            buffer: vec![0; width * height],
            width,
            height,
        })
    }
}

impl FrameSink for WindowSink {
    fn present(&mut self, image: &RgbImage, _report: &FrameReport) -> Result<bool> {
        if !self.window.is_open() || self.window.is_key_down(minifb::Key::Escape) {
            return Ok(false);
        }

        self.width = image.width() as usize;
        self.height = image.height() as usize;
        pack_rgb(image, &mut self.buffer);

        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)
            .map_err(|e| anyhow::anyhow!("window update failed: {e}"))?;
        Ok(true)
    }
}

/// Where `image` writes annotated frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveTarget {
    /// One input image, written to this file.
    File(PathBuf),
    /// A directory of inputs; each is written here as `<input stem>.png`.
    Dir(PathBuf),
}

impl SaveTarget {
    /// `Dir` when the input is a directory, however many images it holds.
    pub fn for_input(input: &Path, output: PathBuf) -> Self {
        if input.is_dir() {
            SaveTarget::Dir(output)
        } else {
            SaveTarget::File(output)
        }
    }
}

/// Prints each report as JSON and, when a target is set, saves the annotated image.
pub struct SaveSink<W> {
    json: JsonSink<W>,
    inputs: Vec<PathBuf>,
    target: Option<SaveTarget>,
}

impl<W: std::io::Write> SaveSink<W> {
    pub fn new(out: W, inputs: Vec<PathBuf>, target: Option<SaveTarget>) -> Result<Self> {
        if let Some(SaveTarget::Dir(dir)) = &target {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating output directory {}", dir.display()))?;
        }
        Ok(Self {
            json: JsonSink::new(out),
            inputs,
            target,
        })
    }

    fn path_for(&self, frame: u32) -> Option<PathBuf> {
        match self.target.as_ref()? {
            SaveTarget::File(path) => Some(path.clone()),
            SaveTarget::Dir(dir) => {
                let stem = self
                    .inputs
                    .get(frame as usize)
                    .and_then(|p| p.file_stem())
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("frame-{frame:05}"));
                Some(dir.join(format!("{stem}.png")))
            }
        }
    }
}

impl<W: std::io::Write> FrameSink for SaveSink<W> {
    fn present(&mut self, image: &RgbImage, report: &FrameReport) -> Result<bool> {
        self.json.present(image, report)?;
        if let Some(path) = self.path_for(report.frame) {
            save(image, &path)?;
            tracing::info!(path = %path.display(), "wrote annotated image");
        }
        Ok(true)
    }
}

fn save(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))
}

/// Pack RGB8 pixels into minifb's 0RGB `u32` layout.
fn pack_rgb(image: &RgbImage, buffer: &mut Vec<u32>) {
    buffer.clear();
    buffer.extend(
        image
            .pixels()
            .map(|p| (u32::from(p[0]) << 16) | (u32::from(p[1]) << 8) | u32::from(p[2])),
    );
}
