use ndarray::prelude::*;

use crate::{MlErr, Result, arch::Mode};

/// Batch normalization over the last (channel) axis.
///
/// Parameter layout: `channels` scales followed by `channels` shifts. The running mean and
/// variance are layer state, not parameters, they're only updated by `Mode::Train` passes.
#[derive(Clone, Debug)]
pub struct BatchNorm {
    channels: usize,
    momentum: f32,
    epsilon: f32,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,

    // Forward metadata
    cache: Option<Cache>,
}

#[derive(Clone, Debug)]
struct Cache {
    shape: Vec<usize>,
    x_hat: Array2<f32>,
    inv_std: Array1<f32>,
    batch_stats: bool,
}

impl BatchNorm {
    /// Creates a new `BatchNorm` layer.
    ///
    /// # Arguments
    /// * `channels` - The size of the normalized axis.
    /// * `momentum` - The weight of the previous running statistics on each update.
    /// * `epsilon` - Added to the variance to avoid dividing by zero.
    pub fn new(channels: usize, momentum: f32, epsilon: f32) -> Self {
        Self {
            channels,
            momentum,
            epsilon,
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            cache: None,
        }
    }

    pub fn size(&self) -> usize {
        2 * self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn running_mean(&self) -> ArrayView1<'_, f32> {
        self.running_mean.view()
    }

    pub fn running_var(&self) -> ArrayView1<'_, f32> {
        self.running_var.view()
    }

    /// Replaces the running statistics, used when restoring a persisted model.
    pub fn set_running_stats(&mut self, mean: Array1<f32>, var: Array1<f32>) -> Result<()> {
        for stat in [&mean, &var] {
            if stat.len() != self.channels {
                return Err(MlErr::SizeMismatch {
                    what: "batch norm running statistics",
                    got: stat.len(),
                    expected: self.channels,
                });
            }
        }

        self.running_mean = mean;
        self.running_var = var;
        Ok(())
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>, mode: Mode) -> Result<ArrayD<f32>> {
        let shape = x.shape().to_vec();
        let c = shape.last().copied().unwrap_or_default();
        if c != self.channels {
            return Err(MlErr::SizeMismatch {
                what: "batch norm channels",
                got: c,
                expected: self.channels,
            });
        }

        let m = x.len() / c;
        let x = x.to_shape((m, c))?;
        let (gamma, beta) = self.view_params(params)?;

        let (mean, var) = if mode.uses_batch_stats() {
            let empty = || MlErr::SizeMismatch {
                what: "batch norm batch",
                got: 0,
                expected: 1,
            };
            let mean = x.mean_axis(Axis(0)).ok_or_else(empty)?;
            let var = x.var_axis(Axis(0), 0.);

            if mode.updates_running_stats() {
                let mo = self.momentum;
                self.running_mean = &self.running_mean * mo + &mean * (1. - mo);
                self.running_var = &self.running_var * mo + &var * (1. - mo);
            }

            (mean, var)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let inv_std = var.mapv(|v| 1. / (v + self.epsilon).sqrt());
        let x_hat = (&x - &mean) * &inv_std;
        let y = &x_hat * &gamma + &beta;

        self.cache = Some(Cache {
            shape: shape.clone(),
            x_hat,
            inv_std,
            batch_stats: mode.uses_batch_stats(),
        });

        Ok(y.into_shape_with_order(shape)?)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: Option<&mut [f32]>,
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(MlErr::MissingForwardPass { layer: "batch norm" })?;

        if d.shape() != cache.shape.as_slice() {
            return Err(MlErr::ShapeMismatch {
                what: "batch norm delta",
                got: d.shape().to_vec(),
                expected: cache.shape.clone(),
            });
        }

        let c = self.channels;
        let m = d.len() / c;
        let d = d.to_shape((m, c))?;
        let (gamma, _) = self.view_params(params)?;

        let dbeta = d.sum_axis(Axis(0));
        let dgamma = (&d * &cache.x_hat).sum_axis(Axis(0));

        if let Some(grad) = grad {
            let (dg, db) = grad.split_at_mut(c);
            dg.iter_mut().zip(&dgamma).for_each(|(g, v)| *g = *v);
            db.iter_mut().zip(&dbeta).for_each(|(g, v)| *g = *v);
        }

        let scale = &gamma * &cache.inv_std;
        let dx = if cache.batch_stats {
            let m = m as f32;
            (&d * m - &dbeta - &cache.x_hat * &dgamma) * (&scale / m)
        } else {
            &d * &scale
        };

        Ok(dx.into_shape_with_order(cache.shape.clone())?)
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView1<'a, f32>, ArrayView1<'a, f32>)> {
        let (gamma, beta) = params.split_at(self.channels);
        Ok((
            ArrayView1::from_shape(self.channels, gamma)?,
            ArrayView1::from_shape(self.channels, beta)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_params(channels: usize) -> Vec<f32> {
        [vec![1.; channels], vec![0.; channels]].concat()
    }

    #[test]
    fn training_pass_normalizes_each_channel() {
        let mut bn = BatchNorm::new(2, 0.8, 1e-5);
        let x = array![[1., 10.], [3., 20.], [5., 30.]].into_dyn();

        let y = bn.forward(&identity_params(2), x, Mode::Train).unwrap();
        let y = y.into_dimensionality::<Ix2>().unwrap();

        for col in y.columns() {
            assert!(col.mean().unwrap().abs() < 1e-5);
            assert!((col.var(0.) - 1.).abs() < 1e-3);
        }
    }

    #[test]
    fn only_training_passes_move_running_stats() {
        let mut bn = BatchNorm::new(1, 0.8, 1e-3);
        let params = identity_params(1);
        let x = array![[2.], [4.]].into_dyn();

        bn.forward(&params, x.clone(), Mode::Frozen).unwrap();
        assert_eq!(bn.running_mean(), array![0.]);
        assert_eq!(bn.running_var(), array![1.]);

        bn.forward(&params, x, Mode::Train).unwrap();
        assert!((bn.running_mean()[0] - 0.6).abs() < 1e-6);
        assert!((bn.running_var()[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn inference_uses_running_stats() {
        let mut bn = BatchNorm::new(1, 0.8, 0.);
        bn.set_running_stats(array![1.], array![4.]).unwrap();

        let y = bn
            .forward(&identity_params(1), array![[5.]].into_dyn(), Mode::Infer)
            .unwrap();
        assert_eq!(y, array![[2.]].into_dyn());
    }

    #[test]
    fn running_stats_must_match_channels() {
        let mut bn = BatchNorm::new(2, 0.8, 1e-3);
        assert!(bn.set_running_stats(array![0.], array![1.]).is_err());
    }
}
