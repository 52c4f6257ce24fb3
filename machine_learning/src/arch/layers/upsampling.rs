use ndarray::prelude::*;

use crate::{MlErr, Result};

/// Nearest neighbour upsampling of the two spatial axes of a channels-last batch.
#[derive(Clone, Debug)]
pub struct UpSampling2d {
    factor: usize,
    input_dim: Option<(usize, usize, usize, usize)>,
}

impl UpSampling2d {
    pub fn new(factor: usize) -> Self {
        Self {
            factor,
            input_dim: None,
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix4>()?;
        let (n, h, w, c) = x.dim();
        let f = self.factor;

        let y = Array4::from_shape_fn((n, h * f, w * f, c), |(i, y, x_, ch)| {
            x[[i, y / f, x_ / f, ch]]
        });

        self.input_dim = Some((n, h, w, c));
        Ok(y.into_dyn())
    }

    /// Every input pixel was copied into a `factor × factor` block, so its delta is the sum
    /// of the block's deltas.
    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let dim = self
            .input_dim
            .ok_or(MlErr::MissingForwardPass { layer: "upsampling" })?;
        let d = d.into_dimensionality::<Ix4>()?;
        let f = self.factor;

        let (n, h, w, c) = dim;
        if d.dim() != (n, h * f, w * f, c) {
            return Err(MlErr::ShapeMismatch {
                what: "upsampling delta",
                got: d.shape().to_vec(),
                expected: vec![n, h * f, w * f, c],
            });
        }

        let mut dx = Array4::<f32>::zeros(dim);
        for ((i, y, x, ch), v) in d.indexed_iter() {
            dx[[i, y / f, x / f, ch]] += v;
        }

        Ok(dx.into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_each_spatial_axis() {
        let mut up = UpSampling2d::new(2);
        let x = array![[1., 2.], [3., 4.]]
            .into_shape_with_order((1, 2, 2, 1))
            .unwrap();

        let y = up.forward(x.into_dyn()).unwrap();
        let y = y.into_shape_with_order((4, 4)).unwrap();

        assert_eq!(y.row(0), array![1., 1., 2., 2.]);
        assert_eq!(y.row(3), array![3., 3., 4., 4.]);
    }

    #[test]
    fn backward_sums_blocks() {
        let mut up = UpSampling2d::new(2);
        up.forward(Array4::<f32>::zeros((1, 1, 2, 1)).into_dyn()).unwrap();

        let d = Array4::from_shape_fn((1, 2, 4, 1), |(_, _, x, _)| x as f32).into_dyn();
        let dx = up.backward(d).unwrap();

        // Left block: 0 + 1 on both rows, right block: 2 + 3 on both rows.
        assert_eq!(dx.into_shape_with_order(2).unwrap(), array![2., 10.]);
    }
}
