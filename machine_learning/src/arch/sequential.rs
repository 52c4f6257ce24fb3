use std::{cell::RefCell, rc::Rc};

use ndarray::ArrayD;
use rand::Rng;

use super::{LayerSpec, Mode, layers::Layer};
use crate::{
    MlErr, Result,
    initialization::{ChainedParamGen, ParamGen},
};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// The model doesn't own its parameters, they live in a flat buffer laid out layer after
/// layer which is handed to every pass.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Rebuilds a `Sequential` from the specifications of its layers.
    ///
    /// # Arguments
    /// * `specs` - The layer specifications, in order.
    /// * `seed` - The base seed for the layers with their own randomness.
    pub fn from_specs<I>(specs: I, seed: u64) -> Result<Self>
    where
        I: IntoIterator<Item = LayerSpec>,
    {
        let layers = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| Layer::from_spec(spec, seed.wrapping_add(i as u64)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { layers })
    }

    /// Returns the size of the model.
    ///
    /// # Returns
    /// The amount of parameters of all its layers.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn specs(&self) -> Vec<LayerSpec> {
        self.layers.iter().map(Layer::spec).collect()
    }

    /// Generates the initial parameters of this model.
    ///
    /// # Arguments
    /// * `rng` - The random number generator shared by every random block.
    ///
    /// # Returns
    /// A flat buffer of `size()` parameters or an error if occurred.
    pub fn init_params<R: Rng + 'static>(&self, rng: &Rc<RefCell<R>>) -> Result<Vec<f32>> {
        let mut param_gens = Vec::with_capacity(2 * self.layers.len());
        for layer in &self.layers {
            param_gens.extend(layer.param_gens(rng)?);
        }

        let size = self.size();
        if size == 0 {
            return Ok(Vec::new());
        }

        let params = ChainedParamGen::new(param_gens)
            .sample(size)
            .unwrap_or_default();

        if params.len() != size {
            return Err(MlErr::ParamGenExhausted {
                got: params.len(),
                expected: size,
            });
        }

        Ok(params)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The model's flat parameter buffer.
    /// * `x` - The input batch.
    /// * `mode` - How the mode dependant layers should behave.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&mut self, params: &[f32], mut x: ArrayD<f32>, mode: Mode) -> Result<ArrayD<f32>> {
        self.check_len("parameters", params.len())?;

        let mut offset = 0;
        for layer in &mut self.layers {
            let size = layer.size();
            x = layer.forward(&params[offset..offset + size], x, mode)?;
            offset += size;
        }

        Ok(x)
    }

    /// Backpropagates `d` through the network, the inverse of the last `forward` call.
    ///
    /// # Arguments
    /// * `params` - The model's flat parameter buffer.
    /// * `grad` - Where to write the gradient, `None` to only compute the input's delta.
    /// * `d` - The delta of the model's output.
    ///
    /// # Returns
    /// The delta of the model's input or an error if occurred.
    pub fn backward(
        &mut self,
        params: &[f32],
        mut grad: Option<&mut [f32]>,
        mut d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        self.check_len("parameters", params.len())?;
        if let Some(grad) = &grad {
            self.check_len("gradient", grad.len())?;
        }

        let mut end = params.len();
        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();

            let layer_grad = match grad.take() {
                Some(g) => {
                    let (rest, tail) = g.split_at_mut(start);
                    grad = Some(rest);
                    Some(tail)
                }
                None => None,
            };

            d = layer.backward(&params[start..end], layer_grad, d)?;
            end = start;
        }

        Ok(d)
    }

    fn check_len(&self, what: &'static str, len: usize) -> Result<()> {
        let size = self.size();
        if len != size {
            return Err(MlErr::SizeMismatch {
                what,
                got: len,
                expected: size,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array4, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::activations::ActFn;

    fn small_convnet() -> Sequential {
        Sequential::new([
            Layer::conv2d(2, 3, 3, 2),
            Layer::batch_norm(3),
            Layer::activation(ActFn::tanh()),
            Layer::zero_padding((0, 1), (0, 1)),
            Layer::upsampling(2),
            Layer::flatten(),
            Layer::dense((3 * 3 * 2 * 2 * 3, 1), Some(ActFn::sigmoid(1.))),
        ])
    }

    fn seeded_params(model: &Sequential, seed: u64) -> Vec<f32> {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
        model.init_params(&rng).unwrap()
    }

    #[test]
    fn init_params_fills_the_whole_model() {
        let model = small_convnet();
        let params = seeded_params(&model, 0);
        assert_eq!(params.len(), model.size());

        // Batch norm starts as the identity.
        let conv = model.layers()[0].size();
        assert_eq!(&params[conv..conv + 6], &[1., 1., 1., 0., 0., 0.]);
    }

    #[test]
    fn forward_rejects_wrong_buffers() {
        let mut model = small_convnet();
        let x = Array4::<f32>::zeros((1, 4, 4, 2)).into_dyn();
        assert!(model.forward(&[0.; 3], x, Mode::Infer).is_err());
    }

    /// Central differences of `sum(forward(params, x))` against the backward pass.
    #[test]
    fn gradient_matches_finite_differences() {
        let mut model = small_convnet();
        let params = seeded_params(&model, 1);
        let x = Array4::from_shape_fn((2, 4, 4, 2), |(n, i, j, c)| {
            ((n * 7 + i * 5 + j * 3 + c) % 11) as f32 / 11. - 0.5
        })
        .into_dyn();

        let y = model.forward(&params, x.clone(), Mode::Frozen).unwrap();
        let mut grad = vec![0.; params.len()];
        model
            .backward(&params, Some(&mut grad[..]), ArrayD::ones(y.raw_dim()))
            .unwrap();

        let h = 1e-2;
        let total = |model: &mut Sequential, params: &[f32]| {
            model
                .forward(params, x.clone(), Mode::Frozen)
                .unwrap()
                .sum()
        };

        for i in (0..params.len()).step_by(7) {
            let (mut up, mut down) = (params.clone(), params.clone());
            up[i] += h;
            down[i] -= h;
            let numeric = (total(&mut model, &up) - total(&mut model, &down)) / (2. * h);
            let tolerance = 1e-2 + 5e-2 * numeric.abs();
            assert!(
                (grad[i] - numeric).abs() < tolerance,
                "param {i}: analytic {} numeric {numeric}",
                grad[i]
            );
        }
    }

    #[test]
    fn frozen_backward_leaves_no_gradient() {
        let mut model = Sequential::new([Layer::dense((2, 1), None)]);
        let params = [1., 2., 0.];

        model
            .forward(&params, array![[1., 1.]].into_dyn(), Mode::Frozen)
            .unwrap();
        let dx = model
            .backward(&params, None, array![[1.]].into_dyn())
            .unwrap();

        assert_eq!(dx, array![[1., 2.]].into_dyn());
    }

    #[test]
    fn specs_round_trip() {
        let model = small_convnet();
        let rebuilt = Sequential::from_specs(model.specs(), 0).unwrap();
        assert_eq!(rebuilt.specs(), model.specs());
    }
}
