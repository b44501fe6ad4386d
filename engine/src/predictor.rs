//! Neural network backend capability.
//!
//! The engine only prepares input tensors and decodes output tensors. The
//! inference itself is done by a [`Predictor`] registered under the model path
//! configured in the `$aiClassify` step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::image::Image;

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("No predictor registered for model '{0}'")]
    ModelNotFound(PathBuf),
    #[error("Tensor shape {shape:?} does not match {len} values")]
    ShapeMismatch { shape: Vec<usize>, len: usize },
    #[error("Unexpected output shape {0:?}")]
    UnexpectedOutput(Vec<usize>),
    #[error("Inference failed: {0}")]
    Backend(String),
}

pub type PredictorResult<T> = Result<T, PredictorError>;

/// Dense row-major `f32` tensor.
#[derive(Clone, PartialEq, Debug)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> PredictorResult<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return Err(PredictorError::ShapeMismatch {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    fn offset(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.shape.len());
        index
            .iter()
            .zip(&self.shape)
            .fold(0, |acc, (&i, &dim)| acc * dim + i)
    }

    pub fn get(&self, index: &[usize]) -> f32 {
        self.data[self.offset(index)]
    }

    pub fn set(&mut self, index: &[usize], value: f32) {
        let offset = self.offset(index);
        self.data[offset] = value;
    }

    /// `[1, channels, height, width]` input built from a grayscale plane.
    ///
    /// The plane is resized to `width x height` and normalised to `0..=1`.
    /// All channels receive the same values.
    pub fn from_image(image: &Image, width: usize, height: usize, channels: usize) -> Self {
        let resized = image.resize_nearest(width, height);
        let plane: Vec<f32> = resized
            .pixels()
            .iter()
            .map(|&v| v as f32 / u16::MAX as f32)
            .collect();
        let mut data = Vec::with_capacity(plane.len() * channels);
        for _ in 0..channels {
            data.extend_from_slice(&plane);
        }
        Self {
            shape: vec![1, channels, height, width],
            data,
        }
    }
}

pub trait Predictor: Send + Sync {
    /// Network input as `(width, height, channels)`.
    fn input_size(&self) -> (usize, usize, usize);

    /// Raw network outputs in the order the model declares them.
    fn predict(&self, input: &Tensor) -> PredictorResult<Vec<Tensor>>;
}

/// Predictors by model path, shared by all worker threads.
#[derive(Default)]
pub struct PredictorRegistry {
    models: RwLock<HashMap<PathBuf, Arc<dyn Predictor>>>,
}

impl PredictorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, model_path: impl Into<PathBuf>, predictor: Arc<dyn Predictor>) {
        self.models.write().insert(model_path.into(), predictor);
    }

    pub fn get(&self, model_path: &Path) -> PredictorResult<Arc<dyn Predictor>> {
        self.models
            .read()
            .get(model_path)
            .cloned()
            .ok_or_else(|| PredictorError::ModelNotFound(model_path.to_path_buf()))
    }

    pub fn contains(&self, model_path: &Path) -> bool {
        self.models.read().contains_key(model_path)
    }
}

impl std::fmt::Debug for PredictorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictorRegistry")
            .field("models", &self.models.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PlaneId;

    #[test]
    fn tensor_indexing_is_row_major() -> anyhow::Result<()> {
        let t = Tensor::new(vec![2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])?;
        assert_eq!(t.get(&[1, 0]), 3.0);
        assert_eq!(t.get(&[0, 2]), 2.0);
        assert!(Tensor::new(vec![2, 2], vec![0.0]).is_err());
        Ok(())
    }

    #[test]
    fn image_input_is_normalised_and_replicated() {
        let image = Image::new_filled(4, 4, u16::MAX, PlaneId::default());
        let t = Tensor::from_image(&image, 2, 2, 3);
        assert_eq!(t.shape(), &[1, 3, 2, 2]);
        assert!(t.data().iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn missing_model_is_reported() {
        let registry = PredictorRegistry::new();
        assert!(matches!(
            registry.get(Path::new("model.onnx")),
            Err(PredictorError::ModelNotFound(_))
        ));
    }
}
