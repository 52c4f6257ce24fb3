use ndarray::{ArrayD, IxDyn};

use crate::{MlErr, Result};

/// Reshapes every sample of a batch, the leading (batch) axis is preserved.
///
/// An empty target shape flattens each sample into a vector.
#[derive(Clone, Debug)]
pub struct Reshape {
    shape: Option<Vec<usize>>,
    input_shape: Option<Vec<usize>>,
}

impl Reshape {
    /// Creates a `Reshape` into the given per-sample shape.
    pub fn new(shape: Vec<usize>) -> Self {
        Self {
            shape: Some(shape),
            input_shape: None,
        }
    }

    /// Creates a `Reshape` that flattens every sample.
    pub fn flatten() -> Self {
        Self {
            shape: None,
            input_shape: None,
        }
    }

    /// Returns the per-sample target shape, `None` when flattening.
    pub fn shape(&self) -> Option<&[usize]> {
        self.shape.as_deref()
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let input_shape = x.shape().to_vec();
        let n = input_shape.first().copied().unwrap_or_default();
        let per_sample: usize = input_shape.iter().skip(1).product();

        let mut target = vec![n];
        match &self.shape {
            Some(shape) => {
                let size: usize = shape.iter().product();
                if size != per_sample {
                    return Err(MlErr::SizeMismatch {
                        what: "reshape sample size",
                        got: per_sample,
                        expected: size,
                    });
                }
                target.extend(shape);
            }
            None => target.push(per_sample),
        }

        let y = x.to_shape(IxDyn(&target))?.into_owned();
        self.input_shape = Some(input_shape);
        Ok(y)
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = self
            .input_shape
            .as_ref()
            .ok_or(MlErr::MissingForwardPass { layer: "reshape" })?;

        Ok(d.to_shape(IxDyn(shape))?.into_owned())
    }
}
