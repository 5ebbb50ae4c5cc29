//! handmark-core: hand landmark features on top of an external landmark model.
//!
//! The landmark model is a black box behind [`LandmarkPredictor`]; [`OnnxHandPredictor`]
//! runs a MediaPipe-style hand landmark network via ONNX Runtime. [`HandDetector`] turns
//! its output into per-hand records, [`features`] derives geometry from them and
//! [`render`] draws the results.

pub mod detector;
pub mod features;
pub mod landmarker;
pub mod render;
pub mod types;

pub use detector::{
    DetectOptions, Detection, DetectorError, FrameResult, HandDetector, LandmarkPredictor,
    PredictorConfig,
};
pub use features::{distance, fingers_up, hand_record};
pub use landmarker::OnnxHandPredictor;
pub use types::{
    BoundingBox, DistanceInfo, Finger, FingerState, HandRecord, Handedness, Landmark,
    LandmarkIdx, NormalizedLandmark, Point, RawHand, HAND_CONNECTIONS, NUM_LANDMARKS,
};

/// Default location of the hand landmark model: `$XDG_DATA_HOME/handmark/models/hand_landmark.onnx`.
pub fn default_model_path() -> std::path::PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        });
    data_dir.join("handmark/models/hand_landmark.onnx")
}
