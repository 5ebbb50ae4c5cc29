use anyhow::{Context, Result};
use handmark_core::PredictorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file, then `HANDMARK_*` variables.
/// Command-line flags are applied on top by `main`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture width; the driver may pick another.
    pub width: u32,
    /// Requested capture height.
    pub height: u32,
    /// Hand landmark ONNX model.
    pub model_path: PathBuf,
    /// Swap Left/Right labels for unmirrored front-facing camera frames.
    pub mirror_handedness: bool,
    /// Frames to discard after opening the camera (auto exposure settling).
    pub warmup_frames: usize,
    /// Consecutive failed captures tolerated before the live loop gives up.
    pub max_capture_failures: usize,
    pub predictor: PredictorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            model_path: handmark_core::default_model_path(),
            mirror_handedness: true,
            warmup_frames: 2,
            max_capture_failures: 5,
            predictor: PredictorConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from variables resolved through `lookup`. Unparsable values are
    /// ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("HANDMARK_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("HANDMARK_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        set_parsed(&mut self.width, lookup("HANDMARK_WIDTH"));
        set_parsed(&mut self.height, lookup("HANDMARK_HEIGHT"));
        set_parsed(&mut self.warmup_frames, lookup("HANDMARK_WARMUP_FRAMES"));
        set_parsed(
            &mut self.max_capture_failures,
            lookup("HANDMARK_MAX_CAPTURE_FAILURES"),
        );
        set_parsed(&mut self.predictor.max_hands, lookup("HANDMARK_MAX_HANDS"));
        set_parsed(
            &mut self.predictor.detection_confidence,
            lookup("HANDMARK_DETECTION_CONFIDENCE"),
        );
        set_parsed(
            &mut self.predictor.tracking_confidence,
            lookup("HANDMARK_TRACKING_CONFIDENCE"),
        );
        if let Some(v) = lookup("HANDMARK_STATIC_IMAGE_MODE") {
            self.predictor.static_image_mode = env_flag(&v);
        }
        if let Some(v) = lookup("HANDMARK_MIRROR") {
            self.mirror_handedness = env_flag(&v);
        }
    }

    pub fn model_path_str(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: Option<String>) {
    if let Some(v) = value.and_then(|v| v.trim().parse().ok()) {
        *slot = v;
    }
}

/// Anything but `0`, `false`, `no` or `off` counts as set.
fn env_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_detector_defaults() {
        let config = Config::default();
        assert_eq!(config.predictor.max_hands, 1);
        assert!((config.predictor.detection_confidence - 0.5).abs() < 1e-6);
        assert!((config.predictor.tracking_confidence - 0.5).abs() < 1e-6);
        assert!(!config.predictor.static_image_mode);
        assert!(config.mirror_handedness);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("HANDMARK_CAMERA_DEVICE", "/dev/video4"),
            ("HANDMARK_MAX_HANDS", "2"),
            ("HANDMARK_DETECTION_CONFIDENCE", "0.8"),
            ("HANDMARK_STATIC_IMAGE_MODE", "1"),
            ("HANDMARK_MIRROR", "off"),
            ("HANDMARK_MODEL_PATH", "/opt/models/hand.onnx"),
        ]));
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.predictor.max_hands, 2);
        assert!((config.predictor.detection_confidence - 0.8).abs() < 1e-6);
        assert!(config.predictor.static_image_mode);
        assert!(!config.mirror_handedness);
        assert_eq!(config.model_path, PathBuf::from("/opt/models/hand.onnx"));
    }

    #[test]
    fn test_env_unparsable_is_ignored() {
        let mut config = Config::default();
        config.apply_env(lookup(&[("HANDMARK_MAX_HANDS", "many"), ("HANDMARK_WIDTH", " 1280 ")]));
        assert_eq!(config.predictor.max_hands, 1);
        assert_eq!(config.width, 1280);
    }

    #[test]
    fn test_toml_partial() {
        let config: Config = toml::from_str(
            r#"
            camera_device = "/dev/video2"
            warmup_frames = 0

            [predictor]
            max_hands = 2
            tracking_confidence = 0.3
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.warmup_frames, 0);
        assert_eq!(config.width, 640);
        assert_eq!(config.predictor.max_hands, 2);
        assert!((config.predictor.tracking_confidence - 0.3).abs() < 1e-6);
        assert!((config.predictor.detection_confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/handmark.toml"))).is_err());
    }

    #[test]
    fn test_env_flag() {
        assert!(env_flag("1"));
        assert!(env_flag("yes"));
        assert!(!env_flag("0"));
        assert!(!env_flag("False"));
    }
}
