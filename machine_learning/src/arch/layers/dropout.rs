use ndarray::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{MlErr, Result, arch::Mode};

/// Inverted dropout: kept units are scaled by `1 / (1 - rate)` so inference needs no rescaling.
#[derive(Clone, Debug)]
pub struct Dropout {
    rate: f32,
    rng: StdRng,
    mask: Option<ArrayD<f32>>,
}

impl Dropout {
    /// Creates a new `Dropout` layer.
    ///
    /// # Arguments
    /// * `rate` - The probability of dropping each unit, in `[0, 1)`.
    /// * `seed` - The seed for the layer's own random number generator.
    pub fn new(rate: f32, seed: u64) -> Result<Self> {
        if !(0. ..1.).contains(&rate) {
            return Err(MlErr::InvalidLayer(format!(
                "dropout rate must be in [0, 1), got {rate}"
            )));
        }

        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            mask: None,
        })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn forward(&mut self, x: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        if !mode.drops() {
            self.mask = None;
            return x;
        }

        let (rate, rng) = (self.rate, &mut self.rng);
        let keep = 1. / (1. - rate);
        let mask = ArrayD::from_shape_fn(x.raw_dim(), |_| {
            if rng.random::<f32>() < rate { 0. } else { keep }
        });

        let y = x * &mask;
        self.mask = Some(mask);
        y
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some(mask) = &self.mask else {
            return Ok(d);
        };

        if mask.shape() != d.shape() {
            return Err(MlErr::ShapeMismatch {
                what: "dropout delta",
                got: d.shape().to_vec(),
                expected: mask.shape().to_vec(),
            });
        }

        Ok(d * mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_is_identity() {
        let mut dropout = Dropout::new(0.5, 7).unwrap();
        let x = ArrayD::<f32>::ones(vec![4, 8]);
        assert_eq!(dropout.forward(x.clone(), Mode::Infer), x);
    }

    #[test]
    fn kept_units_are_rescaled() {
        let mut dropout = Dropout::new(0.25, 7).unwrap();
        let y = dropout.forward(ArrayD::ones(vec![64, 64]), Mode::Train);

        assert!(y.iter().all(|&v| v == 0. || (v - 1. / 0.75).abs() < 1e-6));
        let dropped = y.iter().filter(|&&v| v == 0.).count() as f32 / y.len() as f32;
        assert!((dropped - 0.25).abs() < 0.05);
    }

    #[test]
    fn invalid_rate_fails() {
        assert!(Dropout::new(1., 0).is_err());
        assert!(Dropout::new(-0.1, 0).is_err());
    }
}
