use ndarray::{prelude::*, s};

use crate::{MlErr, Result};

/// Pads the spatial axes of a channels-last batch with zeros.
#[derive(Clone, Debug)]
pub struct ZeroPadding2d {
    top: usize,
    bottom: usize,
    left: usize,
    right: usize,
    input_hw: Option<(usize, usize)>,
}

impl ZeroPadding2d {
    pub fn new((top, bottom): (usize, usize), (left, right): (usize, usize)) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
            input_hw: None,
        }
    }

    /// Returns the padding as `((top, bottom), (left, right))`.
    pub fn padding(&self) -> ((usize, usize), (usize, usize)) {
        ((self.top, self.bottom), (self.left, self.right))
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix4>()?;
        let (n, h, w, c) = x.dim();
        let (t, l) = (self.top, self.left);

        let mut y = Array4::zeros((n, h + t + self.bottom, w + l + self.right, c));
        y.slice_mut(s![.., t..t + h, l..l + w, ..]).assign(&x);

        self.input_hw = Some((h, w));
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let (h, w) = self
            .input_hw
            .ok_or(MlErr::MissingForwardPass { layer: "zero padding" })?;
        let d = d.into_dimensionality::<Ix4>()?;
        let (t, l) = (self.top, self.left);

        let (_, dh, dw, _) = d.dim();
        if dh != h + t + self.bottom || dw != w + l + self.right {
            return Err(MlErr::ShapeMismatch {
                what: "zero padding delta",
                got: d.shape().to_vec(),
                expected: vec![d.shape()[0], h + t + self.bottom, w + l + self.right, d.shape()[3]],
            });
        }

        Ok(d.slice(s![.., t..t + h, l..l + w, ..]).to_owned().into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_bottom_and_right() {
        let mut pad = ZeroPadding2d::new((0, 1), (0, 1));
        let y = pad
            .forward(Array4::<f32>::ones((2, 3, 3, 4)).into_dyn())
            .unwrap();

        assert_eq!(y.shape(), &[2, 4, 4, 4]);
        assert_eq!(y.sum(), 2. * 9. * 4.);

        let dx = pad.backward(y).unwrap();
        assert_eq!(dx, Array4::<f32>::ones((2, 3, 3, 4)).into_dyn());
    }
}
