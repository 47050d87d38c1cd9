//! NCHW float tensors at the runtime boundary.

use ndarray::{Array4, ArrayViewD};

use crate::error::{RecognitionError, Result};

/// Contiguous row-major float tensor with an explicit shape.
#[derive(Debug, Clone)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
}

/// Min/max/mean of a buffer, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl Tensor {
    /// Wrap a single image as a `[1, c, h, w]` tensor.
    pub fn image(data: Vec<f32>, channels: usize, height: usize, width: usize) -> Result<Self> {
        if data.is_empty() {
            return Err(RecognitionError::Preprocessing(
                "image tensor has no data".into(),
            ));
        }
        let expected = channels * height * width;
        if data.len() != expected {
            return Err(RecognitionError::Preprocessing(format!(
                "image tensor length {} does not match {}x{}x{}",
                data.len(),
                channels,
                height,
                width
            )));
        }
        Ok(Self {
            data,
            shape: vec![1, channels, height, width],
        })
    }

    /// Stack equally sized image flats into `[N, c, h, w]`.
    pub fn batch(
        images: &[Vec<f32>],
        channels: usize,
        height: usize,
        width: usize,
    ) -> Result<Self> {
        if images.is_empty() {
            return Err(RecognitionError::Preprocessing("empty batch".into()));
        }
        let per_image = channels * height * width;
        let mut data = Vec::with_capacity(per_image * images.len());
        for (i, flat) in images.iter().enumerate() {
            if flat.len() != per_image {
                return Err(RecognitionError::Preprocessing(format!(
                    "batch entry {i} has length {}, expected {per_image}",
                    flat.len()
                )));
            }
            data.extend_from_slice(flat);
        }
        Ok(Self {
            data,
            shape: vec![images.len(), channels, height, width],
        })
    }

    pub fn from_parts(data: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        let tensor = Self { data, shape };
        tensor.verify()?;
        Ok(tensor)
    }

    /// Copy a runtime output view into an owned tensor.
    pub fn from_view(view: ArrayViewD<'_, f32>) -> Self {
        Self {
            shape: view.shape().to_vec(),
            data: view.iter().copied().collect(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Shape sanity: rank 4, positive dims, element count matching.
    pub fn verify(&self) -> Result<()> {
        validate_nchw(&self.shape)?;
        let expected: usize = self.shape.iter().product();
        if self.data.len() != expected {
            return Err(RecognitionError::Preprocessing(format!(
                "tensor has {} elements, shape {:?} needs {expected}",
                self.data.len(),
                self.shape
            )));
        }
        Ok(())
    }

    /// View as an `ndarray` batch array for the runtime.
    pub fn to_array4(&self) -> Result<Array4<f32>> {
        validate_nchw(&self.shape)?;
        Array4::from_shape_vec(
            (self.shape[0], self.shape[1], self.shape[2], self.shape[3]),
            self.data.clone(),
        )
        .map_err(|e| RecognitionError::Preprocessing(format!("tensor reshape failed: {e}")))
    }

    pub fn stats(&self) -> TensorStats {
        stats(&self.data)
    }
}

/// Rank-4 with all dimensions strictly positive.
pub fn validate_nchw(shape: &[usize]) -> Result<()> {
    if shape.len() != 4 {
        return Err(RecognitionError::Preprocessing(format!(
            "expected rank 4 NCHW shape, got {:?}",
            shape
        )));
    }
    if shape.iter().any(|&d| d == 0) {
        return Err(RecognitionError::Preprocessing(format!(
            "NCHW shape has a zero dimension: {:?}",
            shape
        )));
    }
    Ok(())
}

pub fn stats(data: &[f32]) -> TensorStats {
    if data.is_empty() {
        return TensorStats {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
        };
    }
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    for &v in data {
        min = min.min(v);
        max = max.max(v);
        sum += f64::from(v);
    }
    TensorStats {
        min,
        max,
        mean: (sum / data.len() as f64) as f32,
    }
}
