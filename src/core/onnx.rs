use crate::common::{BallotError, Config, Result};
use crate::core::capability::{CompareOptions, Comparison, FaceCandidate, FaceCapability};
use crate::core::detector::{FaceBox, FaceDetector};
use crate::core::recognizer::FaceRecognizer;
use image::DynamicImage;
use std::cmp::Ordering;
use std::path::Path;

/// [`FaceCapability`] backed by an ONNX detector and an ONNX embedding model.
pub struct OnnxFaceCapability {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    detection_confidence: f32,
    verification_threshold: f32,
}

impl OnnxFaceCapability {
    pub fn new(config: &Config, models_base: &Path) -> Result<Self> {
        let detector = FaceDetector::new(config, models_base)?;
        let recognizer = FaceRecognizer::new(config, models_base)?;
        tracing::info!(
            "Face capability ready (model={}, verification threshold={:.2})",
            recognizer.model_name(),
            config.recognizer.verification_threshold
        );

        Ok(Self {
            detector,
            recognizer,
            detection_confidence: config.detector.detection_confidence,
            verification_threshold: config.recognizer.verification_threshold,
        })
    }

    /// Largest face in the frame. `None` means "use the whole frame" and is
    /// only allowed when detection is not enforced.
    fn locate(&self, image: &DynamicImage, enforce_detection: bool) -> Result<Option<FaceBox>> {
        let faces = self.detector.detect(image, self.detection_confidence)?;
        let largest = faces
            .into_iter()
            .max_by(|a, b| a.area().partial_cmp(&b.area()).unwrap_or(Ordering::Equal));

        match largest {
            Some(face) => Ok(Some(face)),
            None if enforce_detection => Err(BallotError::NoFaceDetected),
            None => Ok(None),
        }
    }
}

impl FaceCapability for OnnxFaceCapability {
    fn model_name(&self) -> &str {
        self.recognizer.model_name()
    }

    fn detect_presence(
        &self,
        image: &DynamicImage,
        enforce_detection: bool,
    ) -> Result<Vec<FaceCandidate>> {
        let min_confidence = if enforce_detection { self.detection_confidence } else { 0.0 };
        let candidates: Vec<FaceCandidate> = self
            .detector
            .detect(image, min_confidence)?
            .iter()
            .map(|face| FaceCandidate {
                confidence: face.confidence,
                width: face.width() as u32,
                height: face.height() as u32,
            })
            .collect();

        if candidates.is_empty() {
            if enforce_detection {
                return Err(BallotError::NoFaceDetected);
            }
            // Best effort: the whole frame with no confidence.
            return Ok(vec![FaceCandidate {
                confidence: 0.0,
                width: image.width(),
                height: image.height(),
            }]);
        }

        Ok(candidates)
    }

    fn compare(
        &self,
        image_a: &DynamicImage,
        image_b: &DynamicImage,
        options: &CompareOptions,
    ) -> Result<Comparison> {
        let face_a = self.locate(image_a, options.enforce_detection)?;
        let face_b = self.locate(image_b, options.enforce_detection)?;

        let embedding_a = self.recognizer.get_embedding(image_a, face_a.as_ref())?;
        let embedding_b = self.recognizer.get_embedding(image_b, face_b.as_ref())?;
        if embedding_a.is_empty() || embedding_a.len() != embedding_b.len() {
            return Err(BallotError::Other(anyhow::anyhow!(
                "embedding length mismatch: {} vs {}",
                embedding_a.len(),
                embedding_b.len()
            )));
        }

        let distance = options.metric.distance(&embedding_a, &embedding_b);
        Ok(Comparison {
            distance,
            verified: distance <= self.verification_threshold,
            threshold: self.verification_threshold,
        })
    }
}
