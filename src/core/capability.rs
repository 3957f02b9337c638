//! Boundary with the face-analysis capability.
//!
//! The identification core never looks inside embeddings or detector
//! outputs itself; it asks a [`FaceCapability`] for candidate regions and
//! for pairwise comparisons and applies its own policy on top.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::common::Result;
use crate::core::recognizer::cosine_similarity;

/// A face region reported by the capability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCandidate {
    /// In `[0, 1]`; zero when detection was not enforced and nothing was localised.
    pub confidence: f32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub distance: f32,
    /// The capability's own verdict against its model threshold.
    pub verified: bool,
    pub threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::Euclidean => euclidean(a, b),
            DistanceMetric::EuclideanL2 => euclidean(&l2_normalize(a), &l2_normalize(b)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareOptions {
    pub metric: DistanceMetric,
    /// When false the capability must degrade to a best-effort estimate
    /// instead of failing on images where no face can be localised.
    pub enforce_detection: bool,
}

pub trait FaceCapability {
    /// Name of the embedding model behind [`FaceCapability::compare`].
    fn model_name(&self) -> &str;

    fn detect_presence(
        &self,
        image: &DynamicImage,
        enforce_detection: bool,
    ) -> Result<Vec<FaceCandidate>>;

    fn compare(
        &self,
        image_a: &DynamicImage,
        image_b: &DynamicImage,
        options: &CompareOptions,
    ) -> Result<Comparison>;
}
