//! Per-frame hand detection on top of a [`LandmarkPredictor`].
//!
//! [`HandDetector::find_hands`] runs the predictor, converts each hand into a
//! [`HandRecord`] and keeps the result as the most recent [`Detection`]. Per-hand queries
//! go through that `Detection` value explicitly rather than through detector state.

use crate::features;
use crate::render;
use crate::types::{BoundingBox, FingerState, HandRecord, Point, RawHand};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download a hand landmark ONNX model and point HANDMARK_MODEL_PATH at it")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid predictor config: {0}")]
    InvalidConfig(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("no current detection available")]
    NoCurrentDetection,
    #[error("hand index {index} out of range ({count} hands detected)")]
    HandIndexOutOfRange { index: usize, count: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// The external landmark model.
///
/// Implementations receive an RGB frame and return every hand they find, in their own
/// order, with landmarks normalized to the frame size.
pub trait LandmarkPredictor {
    fn predict(&mut self, frame: &RgbImage) -> Result<Vec<RawHand>, DetectorError>;
}

impl<P: LandmarkPredictor + ?Sized> LandmarkPredictor for Box<P> {
    fn predict(&mut self, frame: &RgbImage) -> Result<Vec<RawHand>, DetectorError> {
        (**self).predict(frame)
    }
}

/// Settings handed to the predictor at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Detect from scratch on every frame instead of tracking hands between frames.
    pub static_image_mode: bool,
    /// Upper bound on simultaneously reported hands.
    pub max_hands: usize,
    /// Minimum presence score to accept a newly detected hand.
    pub detection_confidence: f32,
    /// Minimum presence score to keep tracking a hand from the previous frame.
    pub tracking_confidence: f32,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            static_image_mode: false,
            max_hands: 1,
            detection_confidence: 0.5,
            tracking_confidence: 0.5,
        }
    }
}

impl PredictorConfig {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.max_hands == 0 {
            return Err(DetectorError::InvalidConfig(
                "max_hands must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("detection_confidence", self.detection_confidence),
            ("tracking_confidence", self.tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectorError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Per-call switches for [`HandDetector::find_hands`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectOptions {
    /// Produce an annotated copy of the frame.
    pub draw: bool,
    /// Swap Left/Right labels, for frames from a front-facing camera that were not mirrored.
    pub mirror_handedness: bool,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            draw: true,
            mirror_handedness: true,
        }
    }
}

/// All hands found in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub hands: Vec<HandRecord>,
    pub width: u32,
    pub height: u32,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }

    /// Look up a hand by its position in predictor order.
    pub fn hand(&self, index: usize) -> Result<&HandRecord, DetectorError> {
        if self.hands.is_empty() {
            return Err(DetectorError::NoCurrentDetection);
        }
        self.hands
            .get(index)
            .ok_or(DetectorError::HandIndexOutOfRange {
                index,
                count: self.hands.len(),
            })
    }

    /// Extension state of the digits of hand `index`.
    pub fn fingers_up(&self, index: usize) -> Result<FingerState, DetectorError> {
        self.hand(index).map(features::fingers_up)
    }

    /// Indexed pixel positions of hand `index`, with its box.
    pub fn find_position(
        &self,
        index: usize,
    ) -> Result<(Vec<(usize, Point)>, BoundingBox), DetectorError> {
        let hand = self.hand(index)?;
        let positions = hand
            .landmarks
            .iter()
            .enumerate()
            .map(|(id, lm)| (id, lm.xy()))
            .collect();
        Ok((positions, hand.bbox))
    }
}

/// Output of [`HandDetector::find_hands`].
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub detection: Detection,
    /// Copy of the input with overlays, present when [`DetectOptions::draw`] was set.
    pub annotated: Option<RgbImage>,
}

/// Runs a [`LandmarkPredictor`] frame by frame and keeps the latest result.
pub struct HandDetector<P> {
    predictor: P,
    last: Option<Detection>,
}

impl<P: LandmarkPredictor> HandDetector<P> {
    pub fn new(predictor: P) -> Self {
        Self {
            predictor,
            last: None,
        }
    }

    /// Detect hands in `frame`.
    ///
    /// Records keep the predictor's order. Finding no hands is a normal, empty result.
    pub fn find_hands(
        &mut self,
        frame: &RgbImage,
        options: DetectOptions,
    ) -> Result<FrameResult, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectorError::InvalidFrame(format!(
                "frame has zero size ({width}x{height})"
            )));
        }

        let raw = self.predictor.predict(frame)?;
        let hands: Vec<HandRecord> = raw
            .iter()
            .map(|hand| features::hand_record(hand, width, height, options.mirror_handedness))
            .collect();

        tracing::debug!(
            hands = hands.len(),
            types = ?hands.iter().map(|h| h.handedness).collect::<Vec<_>>(),
            "frame processed"
        );

        let annotated = options.draw.then(|| {
            let mut out = frame.clone();
            render::draw_hands(&mut out, &hands);
            out
        });

        let detection = Detection {
            hands,
            width,
            height,
        };
        self.last = Some(detection.clone());

        Ok(FrameResult {
            detection,
            annotated,
        })
    }

    /// The detection stored by the latest successful [`find_hands`](Self::find_hands).
    pub fn last_detection(&self) -> Result<&Detection, DetectorError> {
        self.last.as_ref().ok_or(DetectorError::NoCurrentDetection)
    }

    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    pub fn predictor_mut(&mut self) -> &mut P {
        &mut self.predictor
    }
}
