//! Boosted Haar cascade used as the cheap first stage of the presence gate.
//!
//! The evaluation follows the classic Viola-Jones scheme: histogram
//! equalisation, integral images, variance-normalised rectangle features
//! scaled with the search window, and neighbour voting to group raw hits.
//! Models load from OpenCV's cascade XML (the stock `haarcascade_*.xml`
//! files) or from the JSON form of [`CascadeModel`].

use crate::common::config::CascadeConfig;
use crate::common::{BallotError, Result};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::contrast::equalize_histogram;
use imageproc::integral_image::{integral_image, integral_squared_image};
use serde::{Deserialize, Serialize};
use std::path::Path;

type IntegralImage = ImageBuffer<Luma<u64>, Vec<u64>>;

// Relative tolerance used when deciding that two raw hits describe the same face.
const GROUP_EPS: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Cheap detector returning face regions in a grayscale frame.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<Region>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeModel {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<CascadeStage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeStage {
    pub threshold: f32,
    pub classifiers: Vec<WeakClassifier>,
}

/// A single-feature stump: `left` when the weighted rectangle response is
/// below `threshold` times the window's normalisation factor, `right` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeakClassifier {
    pub rects: Vec<WeightedRect>,
    pub threshold: f32,
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

pub struct HaarCascade {
    model: CascadeModel,
    params: CascadeConfig,
}

impl HaarCascade {
    pub fn new(model: CascadeModel, params: CascadeConfig) -> Result<Self> {
        if model.window_width < 3 || model.window_height < 3 || model.stages.is_empty() {
            return Err(BallotError::CapabilityUnavailable(
                "cascade model needs at least a 3x3 window and one stage".into(),
            ));
        }
        // The window search only terminates when the window keeps growing.
        if !(params.scale_factor > 1.0 && params.scale_factor <= 2.0) {
            return Err(BallotError::Config(format!(
                "Cascade scale factor must be in (1.0, 2.0], got {}",
                params.scale_factor
            )));
        }
        if params.min_face_size == 0 {
            return Err(BallotError::Config(
                "Cascade minimum face size must be at least 1 pixel".into(),
            ));
        }
        let out_of_window = model
            .stages
            .iter()
            .flat_map(|stage| &stage.classifiers)
            .flat_map(|classifier| &classifier.rects)
            .any(|r| {
                r.width == 0
                    || r.height == 0
                    || r.x + r.width > model.window_width
                    || r.y + r.height > model.window_height
            });
        if out_of_window {
            return Err(BallotError::CapabilityUnavailable(
                "cascade feature rectangle is empty or exceeds the detection window".into(),
            ));
        }

        Ok(Self { model, params })
    }

    pub fn load(path: &Path, params: CascadeConfig) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            BallotError::CapabilityUnavailable(format!(
                "failed to read cascade {}: {}",
                path.display(),
                e
            ))
        })?;
        let invalid = |e: &dyn std::fmt::Display| {
            BallotError::CapabilityUnavailable(format!("invalid cascade {}: {}", path.display(), e))
        };
        let model = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xml") => {
                let xml = std::str::from_utf8(&data).map_err(|e| invalid(&e))?;
                CascadeModel::from_opencv_xml(xml).map_err(|e| invalid(&e))?
            }
            _ => serde_json::from_slice::<CascadeModel>(&data).map_err(|e| invalid(&e))?,
        };
        tracing::debug!(
            "Loaded cascade {} ({} stages, {}x{} window)",
            path.display(),
            model.stages.len(),
            model.window_width,
            model.window_height
        );
        Self::new(model, params)
    }

    fn raw_hits(&self, sums: &IntegralImage, squares: &IntegralImage, width: u32, height: u32) -> Vec<Region> {
        let mut hits = Vec::new();
        let mut scale = 1.0f32;

        loop {
            let win_w = (self.model.window_width as f32 * scale).round() as u32;
            let win_h = (self.model.window_height as f32 * scale).round() as u32;
            if win_w > width || win_h > height {
                break;
            }

            if win_w >= self.params.min_face_size && win_h >= self.params.min_face_size {
                let step = (scale.round() as u32).max(1);
                let mut y = 0;
                while y + win_h <= height {
                    let mut x = 0;
                    while x + win_w <= width {
                        if self.window_passes(sums, squares, x, y, win_w, win_h, scale) {
                            hits.push(Region { x, y, width: win_w, height: win_h });
                        }
                        x += step;
                    }
                    y += step;
                }
            }

            scale *= self.params.scale_factor;
        }

        hits
    }

    #[allow(clippy::too_many_arguments)]
    fn window_passes(
        &self,
        sums: &IntegralImage,
        squares: &IntegralImage,
        x: u32,
        y: u32,
        win_w: u32,
        win_h: u32,
        scale: f32,
    ) -> bool {
        // Normalisation runs over the window inset by one model pixel per side.
        let inset = (scale.round() as u32).max(1);
        let norm_w = win_w.saturating_sub(2 * inset).max(1);
        let norm_h = win_h.saturating_sub(2 * inset).max(1);
        let pixels = norm_w as i128 * norm_h as i128;
        let sum = rect_sum(sums, x + inset, y + inset, norm_w, norm_h) as i128;
        let squares_sum = rect_sum(squares, x + inset, y + inset, norm_w, norm_h) as i128;
        // pixels^2 * variance, exact in integers.
        let spread = pixels * squares_sum - sum * sum;
        let norm_area = ((self.model.window_width - 2) * (self.model.window_height - 2)) as f64;
        // Feature responses are compared against `threshold * norm_area * std`;
        // flat windows use a unit factor.
        let norm_factor = if spread > 0 {
            norm_area * (spread as f64).sqrt() / pixels as f64
        } else {
            1.0
        };

        for stage in &self.model.stages {
            let mut stage_sum = 0.0f32;
            for classifier in &stage.classifiers {
                // Weighted rectangle sums expressed in model-window pixels.
                let mut response = 0.0f64;
                for r in &classifier.rects {
                    let rx = x + (r.x as f32 * scale).round() as u32;
                    let ry = y + (r.y as f32 * scale).round() as u32;
                    let rw = ((r.width as f32 * scale).round() as u32).clamp(1, x + win_w - rx);
                    let rh = ((r.height as f32 * scale).round() as u32).clamp(1, y + win_h - ry);
                    let rect_mean = rect_sum(sums, rx, ry, rw, rh) as f64 / (rw * rh) as f64;
                    response += r.weight as f64 * rect_mean * (r.width * r.height) as f64;
                }

                stage_sum += if response < classifier.threshold as f64 * norm_factor {
                    classifier.left
                } else {
                    classifier.right
                };
            }

            if stage_sum < stage.threshold {
                return false;
            }
        }

        true
    }
}

impl RegionDetector for HaarCascade {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<Region>> {
        let (width, height) = gray.dimensions();
        if width < self.model.window_width || height < self.model.window_height {
            return Ok(Vec::new());
        }

        let equalized = equalize_histogram(gray);
        let sums: IntegralImage = integral_image(&equalized);
        let squares: IntegralImage = integral_squared_image(&equalized);

        let hits = self.raw_hits(&sums, &squares, width, height);
        let faces = group_regions(&hits, self.params.min_neighbors);
        tracing::debug!("Cascade: {} raw hits, {} grouped faces", hits.len(), faces.len());
        Ok(faces)
    }
}

/// Sum over `[x, x+w) x [y, y+h)`; integral images carry a zero first row and column.
fn rect_sum(ii: &IntegralImage, x: u32, y: u32, w: u32, h: u32) -> u64 {
    let a = ii.get_pixel(x, y)[0];
    let b = ii.get_pixel(x + w, y)[0];
    let c = ii.get_pixel(x, y + h)[0];
    let d = ii.get_pixel(x + w, y + h)[0];
    (d + a) - (b + c)
}

fn similar(a: &Region, b: &Region) -> bool {
    let delta = GROUP_EPS * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    let close = |p: u32, q: u32| (p as f32 - q as f32).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

/// Clusters similar hits and keeps clusters with more than `min_neighbors`
/// members, each reduced to its average rectangle.
pub fn group_regions(hits: &[Region], min_neighbors: u32) -> Vec<Region> {
    if min_neighbors == 0 {
        return hits.to_vec();
    }

    let mut parent: Vec<usize> = (0..hits.len()).collect();
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..hits.len() {
        for j in (i + 1)..hits.len() {
            if similar(&hits[i], &hits[j]) {
                let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // (count, x, y, w, h) accumulated per cluster root, in first-seen order.
    let mut clusters: Vec<(usize, [u64; 5])> = Vec::new();
    for (i, hit) in hits.iter().enumerate() {
        let r = root(&mut parent, i);
        let slot = match clusters.iter().position(|(label, _)| *label == r) {
            Some(pos) => pos,
            None => {
                clusters.push((r, [0; 5]));
                clusters.len() - 1
            }
        };
        let acc = &mut clusters[slot].1;
        acc[0] += 1;
        acc[1] += hit.x as u64;
        acc[2] += hit.y as u64;
        acc[3] += hit.width as u64;
        acc[4] += hit.height as u64;
    }

    clusters
        .into_iter()
        .filter(|(_, acc)| acc[0] > min_neighbors as u64)
        .map(|(_, acc)| {
            let n = acc[0];
            Region {
                x: (acc[1] / n) as u32,
                y: (acc[2] / n) as u32,
                width: (acc[3] / n) as u32,
                height: (acc[4] / n) as u32,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One-stage cascade that fires on a dark square centred in a brighter window.
    pub(crate) fn center_dark_model() -> CascadeModel {
        CascadeModel {
            window_width: 20,
            window_height: 20,
            stages: vec![CascadeStage {
                threshold: 0.0,
                classifiers: vec![WeakClassifier {
                    rects: vec![
                        WeightedRect { x: 0, y: 0, width: 20, height: 20, weight: 1.0 },
                        WeightedRect { x: 5, y: 5, width: 10, height: 10, weight: -4.0 },
                    ],
                    threshold: 0.5,
                    left: -1.0,
                    right: 1.0,
                }],
            }],
        }
    }

    /// 200x200 mid-grey frame with a 100x100 bright patch whose centre 50x50 is black.
    pub(crate) fn synthetic_face_frame() -> GrayImage {
        GrayImage::from_fn(200, 200, |x, y| {
            if (75..125).contains(&x) && (75..125).contains(&y) {
                Luma([0])
            } else if (50..150).contains(&x) && (50..150).contains(&y) {
                Luma([255])
            } else {
                Luma([128])
            }
        })
    }

    fn cascade() -> HaarCascade {
        HaarCascade::new(center_dark_model(), CascadeConfig::default()).unwrap()
    }

    #[test]
    fn finds_the_synthetic_face() {
        let faces = cascade().detect(&synthetic_face_frame()).unwrap();
        assert!(!faces.is_empty());
        let face = faces[0];
        assert!(face.width >= 60);
        // The grouped box overlaps the rendered patch.
        assert!(face.x < 150 && face.x + face.width >= 50);
        assert!(face.y < 150 && face.y + face.height >= 50);
    }

    #[test]
    fn blank_frames_have_no_faces() {
        for value in [0u8, 128, 255] {
            let frame = GrayImage::from_pixel(200, 200, Luma([value]));
            assert!(cascade().detect(&frame).unwrap().is_empty());
        }
    }

    #[test]
    fn frame_smaller_than_window_is_empty() {
        let frame = GrayImage::from_pixel(10, 10, Luma([0]));
        assert!(cascade().detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn rejects_feature_outside_window() {
        let mut model = center_dark_model();
        model.stages[0].classifiers[0].rects[1].x = 15;
        assert!(matches!(
            HaarCascade::new(model, CascadeConfig::default()),
            Err(BallotError::CapabilityUnavailable(_))
        ));
    }

    #[test]
    fn rejects_scale_factors_that_never_grow_the_window() {
        for scale_factor in [1.0, 0.9, f32::NAN, 2.5] {
            let params = CascadeConfig { scale_factor, ..CascadeConfig::default() };
            assert!(
                matches!(HaarCascade::new(center_dark_model(), params), Err(BallotError::Config(_))),
                "scale factor {scale_factor} should be rejected"
            );
        }
    }

    #[test]
    fn detection_terminates_at_smallest_valid_scale_factor() {
        let params = CascadeConfig { scale_factor: 1.5, min_face_size: 1, ..CascadeConfig::default() };
        let cascade = HaarCascade::new(center_dark_model(), params).unwrap();
        assert!(!cascade.detect(&synthetic_face_frame()).unwrap().is_empty());
    }

    #[test]
    fn grouping_drops_isolated_hits() {
        let cluster: Vec<Region> = (0..6)
            .map(|i| Region { x: 50 + i, y: 50, width: 100, height: 100 })
            .chain(std::iter::once(Region { x: 0, y: 0, width: 20, height: 20 }))
            .collect();
        let grouped = group_regions(&cluster, 4);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].width, 100);
        assert_eq!(grouped[0].x, 52);
    }

    #[test]
    fn loads_opencv_xml_by_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cascade.xml");
        std::fs::write(&path, crate::core::opencv_cascade::tests::CENTER_DARK_XML).unwrap();
        let cascade = HaarCascade::load(&path, CascadeConfig::default()).unwrap();
        assert!(!cascade.detect(&synthetic_face_frame()).unwrap().is_empty());
    }

    #[test]
    fn model_round_trips_through_json_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cascade.json");
        std::fs::write(&path, serde_json::to_vec(&center_dark_model()).unwrap()).unwrap();
        assert!(HaarCascade::load(&path, CascadeConfig::default()).is_ok());
    }
}
