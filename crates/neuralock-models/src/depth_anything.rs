//! Depth Anything V2 monocular depth estimator via ONNX Runtime.
//!
//! The model predicts relative inverse depth (larger is nearer) at a fixed
//! 518x518 input; the result is resized back to the frame's resolution.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array2, Array4};
use neuralock_core::depth::{resize_bilinear, DepthModel, DepthModelError};
use neuralock_core::Frame;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const DEPTH_INPUT_SIZE: usize = 518;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const MODEL_NAME: &str = "depth-anything-v2";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}; set NEURALOCK_MODEL_DIR or pass --depth-model")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Depth Anything V2 session. `Sync` through the session mutex.
pub struct DepthAnything {
    session: Mutex<Session>,
}

impl DepthAnything {
    /// Load the ONNX export from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded depth model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Relative depth at the frame's resolution.
    pub fn infer(&self, frame: &Frame) -> Result<Array2<f32>, ModelError> {
        let input = preprocess(&frame.to_rgb());

        let raw = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| ModelError::Inference("session lock poisoned".into()))?;
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::Inference(format!("depth extraction: {e}")))?;
            let dims: Vec<i64> = shape.iter().copied().collect();
            let map = output_to_map(&dims, data)?;
            map
        };

        let (rows, cols) = (frame.height() as usize, frame.width() as usize);
        tracing::debug!(from = ?raw.dim(), to = ?(rows, cols), "depth inference complete");
        Ok(resize_bilinear(&raw, rows, cols))
    }
}

impl DepthModel for DepthAnything {
    fn estimate(&self, frame: &Frame) -> Result<Array2<f32>, DepthModelError> {
        self.infer(frame)
            .map_err(|e| DepthModelError::Inference(e.to_string()))
    }

    fn name(&self) -> &str {
        MODEL_NAME
    }
}

/// RGB frame → `[1, 3, 518, 518]` ImageNet-normalized tensor.
fn preprocess(rgb: &RgbImage) -> Array4<f32> {
    let size = DEPTH_INPUT_SIZE;
    let resized = imageops::resize(rgb, size as u32, size as u32, FilterType::CatmullRom);
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    tensor
}

/// Interpret a `[1, H, W]` (or `[1, 1, H, W]`, or `[H, W]`) output as a map.
fn output_to_map(shape: &[i64], data: &[f32]) -> Result<Array2<f32>, ModelError> {
    if shape.len() < 2 || shape[..shape.len() - 2].iter().any(|&d| d != 1) {
        return Err(ModelError::Inference(format!("unexpected depth output shape {shape:?}")));
    }
    let rows = shape[shape.len() - 2];
    let cols = shape[shape.len() - 1];
    if rows <= 0 || cols <= 0 {
        return Err(ModelError::Inference(format!("empty depth output {shape:?}")));
    }
    Array2::from_shape_vec((rows as usize, cols as usize), data.to_vec())
        .map_err(|e| ModelError::Inference(format!("depth output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let rgb = RgbImage::from_pixel(640, 360, Rgb([128, 128, 128]));
        let tensor = preprocess(&rgb);
        assert_eq!(tensor.shape(), &[1, 3, DEPTH_INPUT_SIZE, DEPTH_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_imagenet_normalization() {
        let rgb = RgbImage::from_pixel(32, 32, Rgb([255, 0, 0]));
        let tensor = preprocess(&rgb);
        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = -IMAGENET_MEAN[1] / IMAGENET_STD[1];
        assert!((tensor[[0, 0, 100, 100]] - red).abs() < 1e-5);
        assert!((tensor[[0, 1, 100, 100]] - green).abs() < 1e-5);
    }

    #[test]
    fn test_output_shapes() {
        let data = vec![0.5f32; 6];
        assert_eq!(output_to_map(&[1, 2, 3], &data).unwrap().dim(), (2, 3));
        assert_eq!(output_to_map(&[1, 1, 3, 2], &data).unwrap().dim(), (3, 2));
        assert_eq!(output_to_map(&[2, 3], &data).unwrap().dim(), (2, 3));
        assert!(output_to_map(&[2, 1, 3], &data).is_err());
        assert!(output_to_map(&[6], &data).is_err());
        assert!(output_to_map(&[1, 4, 4], &data).is_err());
    }

    #[test]
    fn test_missing_model_file() {
        let result = DepthAnything::load(Path::new("/nonexistent/depth.onnx"));
        assert!(matches!(result, Err(ModelError::ModelNotFound(_))));
    }

    #[test]
    fn test_model_path_defaults() {
        let path = crate::depth_model_path(Path::new("/opt/models"));
        assert_eq!(path, Path::new("/opt/models").join(crate::DEPTH_MODEL_FILE));
    }
}
