use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{BallotError, Result};
use crate::core::capability::DistanceMetric;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_detector_path")]
    pub detector_path: PathBuf,
    #[serde(default = "default_recognizer_path")]
    pub recognizer_path: PathBuf,
    #[serde(default = "default_cascade_path")]
    pub cascade_path: PathBuf,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_detector_path() -> PathBuf { PathBuf::from("face_detector.onnx") }
fn default_recognizer_path() -> PathBuf { PathBuf::from("facenet.onnx") }
fn default_cascade_path() -> PathBuf { PathBuf::from("haarcascade_frontalface_default.xml") }
fn default_optimization_level() -> u32 { 3 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: default_detector_path(),
            recognizer_path: default_recognizer_path(),
            cascade_path: default_cascade_path(),
            optimization_level: default_optimization_level(),
        }
    }
}

/// Sensitivity of the cheap first-stage cascade detector.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CascadeConfig {
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
    #[serde(default = "default_min_neighbors")]
    pub min_neighbors: u32,
    #[serde(default = "default_cascade_min_face")]
    pub min_face_size: u32,
}

fn default_scale_factor() -> f32 { 1.05 }
fn default_min_neighbors() -> u32 { 4 }
fn default_cascade_min_face() -> u32 { 60 }

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            scale_factor: default_scale_factor(),
            min_neighbors: default_min_neighbors(),
            min_face_size: default_cascade_min_face(),
        }
    }
}

/// Acceptance rule for candidates returned by the capability when the cascade misses.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_fallback_min_face")]
    pub min_face_size: u32,
}

fn default_fallback_confidence() -> f32 { 0.20 }
fn default_fallback_min_face() -> u32 { 40 }

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_fallback_confidence(),
            min_face_size: default_fallback_min_face(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou_threshold: f32,
}

fn default_detector_input() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }
fn default_nms_iou() -> f32 { 0.45 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            detection_confidence: default_detection_confidence(),
            nms_iou_threshold: default_nms_iou(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_recognizer_input")]
    pub input_size: u32,
    #[serde(default = "default_normalization")]
    pub normalization_value: f32,
    /// Distance at or below which the model itself reports a comparison as verified.
    #[serde(default = "default_verification_threshold")]
    pub verification_threshold: f32,
}

fn default_model_name() -> String { "Facenet".to_string() }
fn default_recognizer_input() -> u32 { 160 }
fn default_normalization() -> f32 { 127.5 }
fn default_verification_threshold() -> f32 { 0.40 }

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            input_size: default_recognizer_input(),
            normalization_value: default_normalization(),
            verification_threshold: default_verification_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PolicyConfig {
    #[serde(default = "default_strict_threshold")]
    pub strict_threshold: f32,
    #[serde(default = "default_relaxed_threshold")]
    pub relaxed_threshold: f32,
    #[serde(default)]
    pub metric: DistanceMetric,
    #[serde(default = "default_scan_workers")]
    pub scan_workers: usize,
}

fn default_strict_threshold() -> f32 { 0.14 }
fn default_relaxed_threshold() -> f32 { 0.18 }
fn default_scan_workers() -> usize { 1 }

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            strict_threshold: default_strict_threshold(),
            relaxed_threshold: default_relaxed_threshold(),
            metric: DistanceMetric::default(),
            scan_workers: default_scan_workers(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Overrides the system data directory when set.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "configs/faceballot.toml";
        Self::load_from_path(Path::new(config_path))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BallotError::Config(format!(
                "Config file not found: {}. Please create it from the example.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| BallotError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolves a model path relative to `models_base` unless it is already absolute.
    pub fn model_path(&self, path: &Path, models_base: &Path) -> PathBuf {
        if path.is_relative() {
            models_base.join(path)
        } else {
            path.to_path_buf()
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Cascade sensitivity
        if !(self.cascade.scale_factor > 1.0 && self.cascade.scale_factor <= 2.0) {
            return Err(BallotError::Config(format!(
                "Cascade scale factor must be in (1.0, 2.0], got {}",
                self.cascade.scale_factor
            )));
        }
        if self.cascade.min_face_size == 0 {
            return Err(BallotError::Config(
                "Cascade minimum face size must be at least 1 pixel".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.fallback.min_confidence) {
            return Err(BallotError::Config(format!(
                "Fallback confidence must be between 0.0 and 1.0, got {}",
                self.fallback.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.detection_confidence) {
            return Err(BallotError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.detection_confidence
            )));
        }

        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(BallotError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(BallotError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }
        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(BallotError::Config(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }

        if !(self.recognizer.verification_threshold >= 0.0) {
            return Err(BallotError::Config(format!(
                "Verification threshold must be a non-negative number, got {}",
                self.recognizer.verification_threshold
            )));
        }

        // Acceptance policy
        if !(self.policy.strict_threshold >= 0.0 && self.policy.relaxed_threshold >= 0.0) {
            return Err(BallotError::Config(format!(
                "Policy thresholds must be non-negative numbers, got strict={} relaxed={}",
                self.policy.strict_threshold, self.policy.relaxed_threshold
            )));
        }
        if self.policy.relaxed_threshold < self.policy.strict_threshold {
            return Err(BallotError::Config(format!(
                "Relaxed threshold ({}) must not be below strict threshold ({})",
                self.policy.relaxed_threshold, self.policy.strict_threshold
            )));
        }
        if self.policy.scan_workers == 0 || self.policy.scan_workers > 64 {
            return Err(BallotError::Config(format!(
                "Scan workers must be between 1 and 64, got {}",
                self.policy.scan_workers
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_documented_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.policy.strict_threshold, 0.14);
        assert_eq!(config.policy.relaxed_threshold, 0.18);
        assert_eq!(config.policy.metric, DistanceMetric::Cosine);
        assert_eq!(config.cascade.min_neighbors, 4);
        assert_eq!(config.cascade.min_face_size, 60);
        assert_eq!(config.fallback.min_face_size, 40);
        assert_eq!(config.recognizer.model_name, "Facenet");
    }

    #[test]
    fn policy_section_overrides_thresholds() {
        let config = Config::from_toml_str(
            "[policy]\nstrict_threshold = 0.10\nrelaxed_threshold = 0.25\nmetric = \"euclidean_l2\"\n",
        )
        .unwrap();
        assert_eq!(config.policy.strict_threshold, 0.10);
        assert_eq!(config.policy.relaxed_threshold, 0.25);
        assert_eq!(config.policy.metric, DistanceMetric::EuclideanL2);
    }

    #[test]
    fn rejects_relaxed_below_strict() {
        let err = Config::from_toml_str("[policy]\nstrict_threshold = 0.3\nrelaxed_threshold = 0.2\n")
            .unwrap_err();
        assert!(matches!(err, BallotError::Config(_)));
    }

    #[test]
    fn rejects_non_growing_scale_factor() {
        let mut config = Config::default();
        config.cascade.scale_factor = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_nan_scale_factor() {
        let err = Config::from_toml_str("[cascade]\nscale_factor = nan\n").unwrap_err();
        assert!(matches!(err, BallotError::Config(_)));
    }

    #[test]
    fn rejects_nan_thresholds() {
        for toml in [
            "[policy]\nstrict_threshold = nan\n",
            "[policy]\nrelaxed_threshold = nan\n",
            "[recognizer]\nverification_threshold = nan\n",
        ] {
            assert!(
                matches!(Config::from_toml_str(toml), Err(BallotError::Config(_))),
                "{toml} should be rejected"
            );
        }
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::load_from_path(Path::new("/nonexistent/faceballot.toml")).unwrap_err();
        assert!(matches!(err, BallotError::Config(_)));
    }
}
