use crate::common::{Config, Result};
use crate::core::detector::FaceBox;
use crate::core::session::load_session;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, Value};
use std::path::Path;
use std::sync::Arc;

pub type Embedding = Vec<f32>;

pub struct FaceRecognizer {
    session: Session,
    _environment: Arc<Environment>,
    model_name: String,
    input_size: u32,
    normalization_value: f32,
}

impl FaceRecognizer {
    pub fn new(config: &Config, models_base: &Path) -> Result<Self> {
        let model_path = config.model_path(&config.models.recognizer_path, models_base);
        let (environment, session) =
            load_session("face_recognizer", &model_path, config.models.optimization_level)?;

        Ok(Self {
            session,
            _environment: environment,
            model_name: config.recognizer.model_name.clone(),
            input_size: config.recognizer.input_size,
            normalization_value: config.recognizer.normalization_value,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Embeds `face` cropped out of `image`, or the whole frame when no box is given.
    pub fn get_embedding(&self, image: &DynamicImage, face: Option<&FaceBox>) -> Result<Embedding> {
        let face_img = match face {
            Some(face) => crop_face(image, face),
            None => image.clone(),
        };

        let resized = face_img.resize_exact(self.input_size, self.input_size, FilterType::Triangle);
        let input_array = self.preprocess_face(&resized);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;
        let embedding = match outputs.first() {
            Some(output) => output.try_extract::<f32>()?.view().iter().copied().collect(),
            None => Vec::new(),
        };
        Ok(embedding)
    }

    fn preprocess_face(&self, img: &DynamicImage) -> Array4<f32> {
        let rgb = img.to_rgb8();
        let size = self.input_size as usize;
        let norm_val = self.normalization_value;
        let mut array = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                array[[0, channel, y, x]] = (pixel[channel] as f32 - norm_val) / norm_val;
            }
        }

        array
    }
}

fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let x = face.x1.max(0.0) as u32;
    let y = face.y1.max(0.0) as u32;
    let width = face.width().max(1.0) as u32;
    let height = face.height().max(1.0) as u32;

    image.crop_imm(x, y, width, height)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
