//! Hand landmark predictor via ONNX Runtime.
//!
//! Runs a MediaPipe-style hand landmark network (224x224 RGB input; 21 x/y/z landmarks,
//! a hand presence score and a handedness score as outputs) on square regions of interest.
//! Without prior hands the whole frame is letterboxed into one region; when tracking is
//! enabled, the hands found in one frame define the regions searched in the next.

use crate::detector::{DetectorError, LandmarkPredictor, PredictorConfig};
use crate::types::{BoundingBox, Handedness, NormalizedLandmark, Point, RawHand, NUM_LANDMARKS};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- Named constants ---
const LANDMARK_INPUT_SIZE: usize = 224;
const LANDMARK_VALUES: usize = NUM_LANDMARKS * 3;
/// Region side relative to the longer side of the previous frame's landmark box.
const TRACKING_ROI_SCALE: f32 = 2.0;
/// Smallest region (in frame pixels) worth tracking.
const MIN_ROI_SIZE: f32 = 16.0;
/// Handedness scores above this mean Right.
const HANDEDNESS_THRESHOLD: f32 = 0.5;
/// Results overlapping more than this are the same hand.
const DUPLICATE_IOU_THRESHOLD: f32 = 0.5;

/// Output tensor positions, discovered by name at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputIndices {
    landmarks: usize,
    presence: usize,
    handedness: usize,
}

/// Square crop of the frame, in frame pixels. May extend past the frame edges.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Roi {
    cx: f32,
    cy: f32,
    size: f32,
}

impl Roi {
    /// The whole frame, letterboxed into a centered square.
    fn full_frame(width: u32, height: u32) -> Self {
        Self {
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
            size: width.max(height) as f32,
        }
    }

    /// A region around a hand's landmarks, for tracking into the next frame.
    fn around(hand: &RawHand, width: u32, height: u32) -> Option<Self> {
        let bbox = pixel_bbox(hand, width, height)?;
        let size = bbox.width.max(bbox.height) as f32 * TRACKING_ROI_SCALE;
        if size < MIN_ROI_SIZE {
            return None;
        }
        Some(Self {
            cx: bbox.x as f32 + bbox.width as f32 / 2.0,
            cy: bbox.y as f32 + bbox.height as f32 / 2.0,
            size,
        })
    }

    fn origin(&self) -> (f32, f32) {
        (self.cx - self.size / 2.0, self.cy - self.size / 2.0)
    }

    /// Frame pixels per network input pixel.
    fn scale(&self) -> f32 {
        self.size / LANDMARK_INPUT_SIZE as f32
    }
}

/// A hand found in one region, before duplicate suppression.
struct Candidate {
    hand: RawHand,
    bbox: BoundingBox,
}

/// [`LandmarkPredictor`] backed by an ONNX hand landmark model.
pub struct OnnxHandPredictor {
    session: Session,
    config: PredictorConfig,
    outputs: OutputIndices,
    /// Regions derived from the previous frame's hands.
    tracked: Vec<Roi>,
}

impl OnnxHandPredictor {
    /// Load the landmark model from `model_path`.
    pub fn load(model_path: &str, config: PredictorConfig) -> Result<Self, DetectorError> {
        config.validate()?;
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded hand landmark model"
        );

        if output_names.len() < 3 {
            return Err(DetectorError::InferenceFailed(format!(
                "hand landmark model requires 3 outputs (landmarks, presence, handedness), got {}",
                output_names.len()
            )));
        }

        let outputs = discover_output_indices(&output_names);
        tracing::debug!(?outputs, "landmark output tensor mapping");

        Ok(Self {
            session,
            config,
            outputs,
            tracked: Vec::new(),
        })
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Forget tracked hands; the next frame starts from a full-frame search.
    pub fn reset_tracking(&mut self) {
        self.tracked.clear();
    }

    /// Run the network on one region. Returns the hand and its presence score.
    fn run_roi(&mut self, frame: &RgbImage, roi: &Roi) -> Result<(RawHand, f32), DetectorError> {
        let input = preprocess(frame, roi);
        let indices = self.outputs;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, coords) = outputs[indices.landmarks]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("landmarks: {e}")))?;
        let (_, presence) = outputs[indices.presence]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("presence: {e}")))?;
        let (_, handedness) = outputs[indices.handedness]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("handedness: {e}")))?;

        if coords.len() < LANDMARK_VALUES {
            return Err(DetectorError::InferenceFailed(format!(
                "expected {LANDMARK_VALUES} landmark values, got {}",
                coords.len()
            )));
        }
        let presence = presence.first().copied().unwrap_or(0.0).clamp(0.0, 1.0);
        let handedness = handedness.first().copied().unwrap_or(0.0);

        let (width, height) = frame.dimensions();
        let hand = decode_landmarks(coords, presence, handedness, roi, width, height);
        Ok((hand, presence))
    }
}

impl LandmarkPredictor for OnnxHandPredictor {
    fn predict(&mut self, frame: &RgbImage) -> Result<Vec<RawHand>, DetectorError> {
        let (width, height) = frame.dimensions();
        let mut candidates = Vec::new();

        let tracked = if self.config.static_image_mode {
            Vec::new()
        } else {
            std::mem::take(&mut self.tracked)
        };

        for roi in &tracked {
            let (hand, score) = self.run_roi(frame, roi)?;
            if score < self.config.tracking_confidence {
                tracing::debug!(score, "tracked hand lost");
                continue;
            }
            if let Some(bbox) = pixel_bbox(&hand, width, height) {
                candidates.push(Candidate { hand, bbox });
            }
        }

        // Search the whole frame while below the limit; re-finds of tracked hands are
        // dropped as duplicates.
        if candidates.len() < self.config.max_hands {
            let roi = Roi::full_frame(width, height);
            let (hand, score) = self.run_roi(frame, &roi)?;
            if score >= self.config.detection_confidence {
                if let Some(bbox) = pixel_bbox(&hand, width, height) {
                    candidates.push(Candidate { hand, bbox });
                }
            }
        }

        let hands = suppress_duplicates(candidates, self.config.max_hands);

        if !self.config.static_image_mode {
            self.tracked = hands
                .iter()
                .filter_map(|hand| Roi::around(hand, width, height))
                .collect();
        }

        tracing::trace!(hands = hands.len(), tracked = self.tracked.len(), "landmark pass");
        Ok(hands)
    }
}

/// Discover output tensor ordering by name.
///
/// Exports name the outputs either descriptively ("xyz_x21", "hand_score",
/// "lefthand_0_or_righthand_1", ...) or generically ("Identity", "Identity_1", ...).
/// Unrecognized names fall back to positional ordering: landmarks, presence, handedness.
fn discover_output_indices(names: &[String]) -> OutputIndices {
    let lower: Vec<String> = names.iter().map(|n| n.to_ascii_lowercase()).collect();
    let find = |pred: &dyn Fn(&str) -> bool| lower.iter().position(|n| pred(n.as_str()));

    let is_handedness = |n: &str| {
        n.contains("handedness") || n.contains("lefthand") || n.contains("righthand")
    };

    let handedness = find(&is_handedness);
    let presence = find(&|n| {
        !is_handedness(n) && (n.contains("score") || n.contains("flag") || n.contains("presence"))
    });
    let landmarks = find(&|n| {
        !n.contains("world") && (n.contains("xyz") || n.contains("landmark") || n.contains("ld_21"))
    });

    match (landmarks, presence, handedness) {
        (Some(landmarks), Some(presence), Some(handedness)) => {
            tracing::info!("hand landmark model: using name-based output tensor mapping");
            OutputIndices {
                landmarks,
                presence,
                handedness,
            }
        }
        _ => {
            tracing::info!(
                ?names,
                "hand landmark model: output names not recognized, using positional mapping [0]=landmarks, [1]=presence, [2]=handedness"
            );
            OutputIndices {
                landmarks: 0,
                presence: 1,
                handedness: 2,
            }
        }
    }
}

/// Crop `roi` out of the frame into a NHWC float tensor in [0, 1].
///
/// Bilinear sampling; area outside the frame is black.
fn preprocess(frame: &RgbImage, roi: &Roi) -> Array4<f32> {
    let (width, height) = frame.dimensions();
    let (w, h) = (width as usize, height as usize);
    let (x0, y0) = roi.origin();
    let scale = roi.scale();
    let raw = frame.as_raw();

    let mut tensor = Array4::<f32>::zeros((1, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE, 3));

    for y in 0..LANDMARK_INPUT_SIZE {
        let src_y = y0 + (y as f32 + 0.5) * scale - 0.5;
        if src_y < -0.5 || src_y > h as f32 - 0.5 {
            continue;
        }
        let ya = (src_y.floor() as i32).clamp(0, h as i32 - 1) as usize;
        let yb = (ya + 1).min(h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..LANDMARK_INPUT_SIZE {
            let src_x = x0 + (x as f32 + 0.5) * scale - 0.5;
            if src_x < -0.5 || src_x > w as f32 - 0.5 {
                continue;
            }
            let xa = (src_x.floor() as i32).clamp(0, w as i32 - 1) as usize;
            let xb = (xa + 1).min(w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = raw[(ya * w + xa) * 3 + c] as f32;
                let tr = raw[(ya * w + xb) * 3 + c] as f32;
                let bl = raw[(yb * w + xa) * 3 + c] as f32;
                let br = raw[(yb * w + xb) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                tensor[[0, y, x, c]] = val / 255.0;
            }
        }
    }

    tensor
}

/// Map network-space landmarks of one region back to normalized frame coordinates.
fn decode_landmarks(
    coords: &[f32],
    presence: f32,
    handedness: f32,
    roi: &Roi,
    width: u32,
    height: u32,
) -> RawHand {
    let (x0, y0) = roi.origin();
    let scale = roi.scale();
    let (w, h) = (width as f32, height as f32);

    let landmarks: [NormalizedLandmark; NUM_LANDMARKS] = std::array::from_fn(|i| {
        let lx = coords[i * 3];
        let ly = coords[i * 3 + 1];
        let lz = coords[i * 3 + 2];
        NormalizedLandmark {
            x: (x0 + lx * scale) / w,
            y: (y0 + ly * scale) / h,
            z: lz * scale / w,
        }
    });

    RawHand {
        landmarks,
        handedness: if handedness > HANDEDNESS_THRESHOLD {
            Handedness::Right
        } else {
            Handedness::Left
        },
        score: presence,
    }
}

/// Pixel-space landmark box, or `None` if any coordinate is not finite.
fn pixel_bbox(hand: &RawHand, width: u32, height: u32) -> Option<BoundingBox> {
    if hand
        .landmarks
        .iter()
        .any(|lm| !(lm.x.is_finite() && lm.y.is_finite()))
    {
        return None;
    }
    BoundingBox::from_points(hand.landmarks.iter().map(|lm| {
        Point::new(
            (lm.x * width as f32) as i32,
            (lm.y * height as f32) as i32,
        )
    }))
}

/// Drop candidates that overlap a higher-scoring one and keep at most `max_hands`.
///
/// Survivors keep their original relative order, so tracked hands stay ahead of newly
/// found ones.
fn suppress_duplicates(candidates: Vec<Candidate>, max_hands: usize) -> Vec<RawHand> {
    let mut by_score: Vec<usize> = (0..candidates.len()).collect();
    by_score.sort_by(|&a, &b| {
        candidates[b]
            .hand
            .score
            .partial_cmp(&candidates[a].hand.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    for i in by_score {
        if keep.len() >= max_hands {
            break;
        }
        let duplicate = keep
            .iter()
            .any(|&k| candidates[k].bbox.iou(&candidates[i].bbox) > DUPLICATE_IOU_THRESHOLD);
        if !duplicate {
            keep.push(i);
        }
    }
    keep.sort_unstable();

    let mut candidates: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    keep.into_iter()
        .filter_map(|i| candidates[i].take().map(|c| c.hand))
        .collect()
}
