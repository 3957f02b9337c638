use crate::common::config::FallbackConfig;
use crate::core::capability::{FaceCandidate, FaceCapability};
use crate::core::cascade::RegionDetector;
use image::DynamicImage;

/// Which stage accepted a frame, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresenceVerdict {
    Primary { regions: usize },
    Fallback(FaceCandidate),
    Rejected,
}

impl PresenceVerdict {
    pub fn is_present(&self) -> bool {
        !matches!(self, PresenceVerdict::Rejected)
    }
}

/// Two-stage face presence check run before any identification scan.
///
/// The cascade runs on every frame; the capability's best-effort extraction
/// only runs when the cascade finds nothing. A failure inside a stage counts
/// as that stage finding nothing, so the gate never errors.
pub struct PresenceGate<'a, C: FaceCapability + ?Sized> {
    primary: &'a dyn RegionDetector,
    capability: &'a C,
    fallback: FallbackConfig,
}

impl<'a, C: FaceCapability + ?Sized> PresenceGate<'a, C> {
    pub fn new(primary: &'a dyn RegionDetector, capability: &'a C, fallback: FallbackConfig) -> Self {
        Self { primary, capability, fallback }
    }

    pub fn has_face(&self, image: &DynamicImage) -> bool {
        self.inspect(image).is_present()
    }

    pub fn inspect(&self, image: &DynamicImage) -> PresenceVerdict {
        let gray = image.to_luma8();
        match self.primary.detect(&gray) {
            Ok(regions) if !regions.is_empty() => {
                tracing::debug!("Presence gate: cascade found {} region(s)", regions.len());
                return PresenceVerdict::Primary { regions: regions.len() };
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Presence gate: cascade stage failed: {}", e),
        }

        let candidates = match self.capability.detect_presence(image, false) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("Presence gate: fallback stage failed: {}", e);
                return PresenceVerdict::Rejected;
            }
        };

        match candidates.into_iter().find(|c| self.accepts(c)) {
            Some(candidate) => {
                tracing::debug!(
                    "Presence gate: fallback accepted {}x{} face (confidence {:.2})",
                    candidate.width,
                    candidate.height,
                    candidate.confidence
                );
                PresenceVerdict::Fallback(candidate)
            }
            None => {
                tracing::info!("Presence gate: no usable face");
                PresenceVerdict::Rejected
            }
        }
    }

    fn accepts(&self, candidate: &FaceCandidate) -> bool {
        candidate.confidence >= self.fallback.min_confidence
            && candidate.width >= self.fallback.min_face_size
            && candidate.height >= self.fallback.min_face_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::CascadeConfig;
    use crate::common::{BallotError, Result};
    use crate::core::capability::{CompareOptions, Comparison};
    use crate::core::cascade::tests::{center_dark_model, synthetic_face_frame};
    use crate::core::cascade::{HaarCascade, Region};
    use image::GrayImage;
    use std::cell::Cell;

    struct FixedRegions(Result<Vec<Region>>);

    impl RegionDetector for FixedRegions {
        fn detect(&self, _gray: &GrayImage) -> Result<Vec<Region>> {
            match &self.0 {
                Ok(regions) => Ok(regions.clone()),
                Err(_) => Err(BallotError::CapabilityUnavailable("cascade broken".into())),
            }
        }
    }

    #[derive(Default)]
    struct StubCapability {
        candidates: Option<Vec<FaceCandidate>>,
        detect_calls: Cell<usize>,
    }

    impl FaceCapability for StubCapability {
        fn model_name(&self) -> &str {
            "stub"
        }

        fn detect_presence(&self, _image: &DynamicImage, enforce: bool) -> Result<Vec<FaceCandidate>> {
            assert!(!enforce, "fallback must not enforce detection");
            self.detect_calls.set(self.detect_calls.get() + 1);
            self.candidates
                .clone()
                .ok_or_else(|| BallotError::CapabilityUnavailable("model offline".into()))
        }

        fn compare(&self, _a: &DynamicImage, _b: &DynamicImage, _o: &CompareOptions) -> Result<Comparison> {
            unreachable!("the gate never compares")
        }
    }

    fn candidate(confidence: f32, width: u32, height: u32) -> FaceCandidate {
        FaceCandidate { confidence, width, height }
    }

    fn frame() -> DynamicImage {
        DynamicImage::new_luma8(64, 64)
    }

    #[test]
    fn primary_hit_skips_fallback() {
        let primary = FixedRegions(Ok(vec![Region { x: 0, y: 0, width: 80, height: 80 }]));
        let capability = StubCapability::default();
        let gate = PresenceGate::new(&primary, &capability, FallbackConfig::default());

        assert_eq!(gate.inspect(&frame()), PresenceVerdict::Primary { regions: 1 });
        assert_eq!(capability.detect_calls.get(), 0);
    }

    #[test]
    fn fallback_accepts_first_confident_large_candidate() {
        let primary = FixedRegions(Ok(vec![]));
        let capability = StubCapability {
            candidates: Some(vec![candidate(0.9, 30, 30), candidate(0.25, 40, 45), candidate(0.99, 200, 200)]),
            ..Default::default()
        };
        let gate = PresenceGate::new(&primary, &capability, FallbackConfig::default());

        assert_eq!(gate.inspect(&frame()), PresenceVerdict::Fallback(candidate(0.25, 40, 45)));
        assert_eq!(capability.detect_calls.get(), 1);
    }

    #[test]
    fn fallback_rejects_low_confidence_or_small_regions() {
        let primary = FixedRegions(Ok(vec![]));
        let capability = StubCapability {
            candidates: Some(vec![candidate(0.19, 300, 300), candidate(0.8, 39, 100), candidate(0.8, 100, 39)]),
            ..Default::default()
        };
        let gate = PresenceGate::new(&primary, &capability, FallbackConfig::default());
        assert!(!gate.has_face(&frame()));
    }

    #[test]
    fn failures_fail_closed() {
        let primary = FixedRegions(Err(BallotError::NoFaceDetected));
        let capability = StubCapability::default();
        let gate = PresenceGate::new(&primary, &capability, FallbackConfig::default());

        assert!(!gate.has_face(&frame()));
        // A broken cascade still lets the fallback run.
        assert_eq!(capability.detect_calls.get(), 1);
    }

    #[test]
    fn cascade_accepts_rendered_face_and_rejects_blank_frame() {
        let cascade = HaarCascade::new(center_dark_model(), CascadeConfig::default()).unwrap();
        let capability = StubCapability { candidates: Some(vec![]), ..Default::default() };
        let gate = PresenceGate::new(&cascade, &capability, FallbackConfig::default());

        assert!(gate.has_face(&DynamicImage::ImageLuma8(synthetic_face_frame())));
        assert_eq!(capability.detect_calls.get(), 0);

        assert!(!gate.has_face(&DynamicImage::new_rgb8(200, 200)));
        assert_eq!(capability.detect_calls.get(), 1);
    }
}
