use crate::common::{Config, Result};
use crate::core::session::load_session;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, Value};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

// Raw predictions below this never reach NMS.
const RAW_CONFIDENCE_FLOOR: f32 = 0.001;
const MIN_BOX_SIDE: f32 = 10.0;
const MAX_FACES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// YOLO-style ONNX face detector.
pub struct FaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    input_width: u32,
    input_height: u32,
    nms_iou_threshold: f32,
}

impl FaceDetector {
    pub fn new(config: &Config, models_base: &Path) -> Result<Self> {
        let model_path = config.model_path(&config.models.detector_path, models_base);
        let (environment, session) =
            load_session("face_detector", &model_path, config.models.optimization_level)?;

        Ok(Self {
            session,
            _environment: environment,
            input_width: config.detector.input_width,
            input_height: config.detector.input_height,
            nms_iou_threshold: config.detector.nms_iou_threshold,
        })
    }

    /// Faces at or above `min_confidence`, strongest first, in original image coordinates.
    pub fn detect(&self, image: &DynamicImage, min_confidence: f32) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.input_width && image.height() == self.input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(self.input_width, self.input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut faces = match outputs.first() {
            Some(output) => {
                let tensor = output.try_extract::<f32>()?;
                let view = tensor.view();
                let shape = view.shape().to_vec();
                let values: Vec<f32> = view.iter().copied().collect();
                self.parse_predictions(&values, &shape)
            }
            None => Vec::new(),
        };

        // NMS first on everything above the raw floor, then the caller's threshold.
        faces = apply_nms(faces, self.nms_iou_threshold);
        faces.retain(|face| face.confidence >= min_confidence);
        faces.truncate(MAX_FACES);

        let scale_x = orig_width / self.input_width as f32;
        let scale_y = orig_height / self.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));
        let norm_factor = 1.0 / 255.0;

        for (x, y, pixel) in gray.enumerate_pixels() {
            let value = pixel[0] as f32 * norm_factor;
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = value;
            array[[0, 1, y, x]] = value;
            array[[0, 2, y, x]] = value;
        }

        array
    }

    /// Accepts `[1, N, 5+]`, the transposed `[1, 5+, N]` and a flat `[N, 5+]` layout.
    fn parse_predictions(&self, values: &[f32], shape: &[usize]) -> Vec<FaceBox> {
        let (num_predictions, prediction_length, is_transposed) = match shape {
            [_, a, b] if b > a && *a <= 10 => (*b, *a, true),
            [_, a, b] => (*a, *b, false),
            [a, b] => (*a, *b, false),
            _ => {
                tracing::warn!("Unexpected detector output shape: {:?}", shape);
                return Vec::new();
            }
        };
        if prediction_length < 5 || values.len() < num_predictions * prediction_length {
            tracing::warn!("Detector output too short for shape {:?}", shape);
            return Vec::new();
        }

        let at = |i: usize, field: usize| {
            if is_transposed {
                values[field * num_predictions + i]
            } else {
                values[i * prediction_length + field]
            }
        };

        let in_w = self.input_width as f32;
        let in_h = self.input_height as f32;
        let mut faces = Vec::new();

        for i in 0..num_predictions {
            let confidence = at(i, 4);
            if confidence <= RAW_CONFIDENCE_FLOOR {
                continue;
            }

            let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
            // Normalised outputs are scaled into pixel space.
            let scale = if cx > 1.0 || cy > 1.0 || w > 1.0 || h > 1.0 { 1.0 } else { in_w };
            let (cx, cy, w, h) = (cx * scale, cy * scale, w * scale, h * scale);

            let x1 = (cx - w / 2.0).max(0.0);
            let y1 = (cy - h / 2.0).max(0.0);
            let x2 = (cx + w / 2.0).min(in_w);
            let y2 = (cy + h / 2.0).min(in_h);

            if x2 - x1 > MIN_BOX_SIDE && y2 - y1 > MIN_BOX_SIDE {
                faces.push(FaceBox { x1, y1, x2, y2, confidence });
            }
        }

        faces
    }
}

fn by_confidence_desc(a: &FaceBox, b: &FaceBox) -> Ordering {
    b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal)
}

pub fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(by_confidence_desc);

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| calculate_iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub fn calculate_iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = box1.area() + box2.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBox {
        FaceBox { x1, y1, x2, y2, confidence }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = face(0.0, 0.0, 10.0, 10.0, 0.9);
        assert!((calculate_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_strongest_of_overlapping_boxes() {
        let kept = apply_nms(
            vec![
                face(0.0, 0.0, 100.0, 100.0, 0.6),
                face(2.0, 2.0, 102.0, 102.0, 0.9),
                face(300.0, 300.0, 400.0, 400.0, 0.7),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }
}
