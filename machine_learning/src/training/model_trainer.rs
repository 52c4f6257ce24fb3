use ndarray::{Array2, ArrayD, ArrayView2, Ix2};

use super::{BatchStats, Frozen};
use crate::{
    MlErr, Result,
    arch::{
        Mode, Sequential,
        loss::{LossFn, binary_accuracy},
    },
    optimization::Optimizer,
};

/// A model `Trainer`. Owns a model together with its parameters, its gradient buffer and
/// everything needed to update them one batch at a time.
pub struct ModelTrainer<O, L>
where
    O: Optimizer,
    L: LossFn,
{
    model: Sequential,
    params: Vec<f32>,
    grad: Vec<f32>,
    optimizer: O,
    loss_fn: L,
    updates: usize,
}

impl<O, L> ModelTrainer<O, L>
where
    O: Optimizer,
    L: LossFn,
{
    /// Returns a new `ModelTrainer`.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `params` - The model's initial parameters.
    /// * `optimizer` - The optimizer for the model's parameters.
    /// * `loss_fn` - The loss function used to measure the difference between a model's output
    ///   and the expected one.
    ///
    /// # Returns
    /// A new `ModelTrainer` or an error if `params` doesn't fit the model.
    pub fn new(model: Sequential, params: Vec<f32>, optimizer: O, loss_fn: L) -> Result<Self> {
        if params.len() != model.size() {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got: params.len(),
                expected: model.size(),
            });
        }

        Ok(Self {
            grad: vec![0.; params.len()],
            model,
            params,
            optimizer,
            loss_fn,
            updates: 0,
        })
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// The amount of optimizer steps applied to this model so far.
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Runs the model in inference mode, leaving every layer state untouched.
    pub fn predict(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.model.forward(&self.params, x, Mode::Infer)
    }

    /// Makes a single gradient update on a batch.
    ///
    /// # Arguments
    /// * `x` - The input batch.
    /// * `y` - The expected output, one row per sample.
    ///
    /// # Returns
    /// The loss and accuracy on this batch, measured before the update.
    pub fn train_on_batch(&mut self, x: ArrayD<f32>, y: ArrayView2<f32>) -> Result<BatchStats> {
        let y_pred = self.model.forward(&self.params, x, Mode::Train)?;
        let y_pred = y_pred.into_dimensionality::<Ix2>()?;
        let (stats, d) = evaluate(&self.loss_fn, y_pred.view(), y)?;

        self.model
            .backward(&self.params, Some(&mut self.grad[..]), d.into_dyn())?;
        self.apply_grad()?;
        Ok(stats)
    }

    /// Borrows this model as the frozen head of a stacked model.
    pub fn frozen(&mut self) -> Frozen<'_> {
        Frozen::new(&mut self.model, &self.params)
    }

    /// Trains a batch through this model followed by a frozen `head`, only this model's
    /// parameters get updated.
    pub fn train_stacked(
        &mut self,
        head: &mut Frozen<'_>,
        x: ArrayD<f32>,
        y: ArrayView2<f32>,
    ) -> Result<BatchStats> {
        let a = self.model.forward(&self.params, x, Mode::Train)?;
        let y_pred = head.forward(a)?.into_dimensionality::<Ix2>()?;
        let (stats, d) = evaluate(&self.loss_fn, y_pred.view(), y)?;

        let d = head.backward(d.into_dyn())?;
        self.model.backward(&self.params, Some(&mut self.grad[..]), d)?;
        self.apply_grad()?;
        Ok(stats)
    }

    fn apply_grad(&mut self) -> Result<()> {
        self.optimizer.update_params(&self.grad, &mut self.params)?;
        self.updates += 1;
        Ok(())
    }
}

fn evaluate<L: LossFn>(
    loss_fn: &L,
    y_pred: ArrayView2<f32>,
    y: ArrayView2<f32>,
) -> Result<(BatchStats, Array2<f32>)> {
    if y_pred.shape() != y.shape() {
        return Err(MlErr::ShapeMismatch {
            what: "labels",
            got: y.shape().to_vec(),
            expected: y_pred.shape().to_vec(),
        });
    }

    let stats = BatchStats::new(loss_fn.loss(y_pred, y), binary_accuracy(y_pred, y));
    Ok((stats, loss_fn.loss_prime(y_pred, y)))
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::{activations::ActFn, layers::Layer, loss::BinaryCrossEntropy},
        optimization::Adam,
    };

    fn classifier(seed: u64) -> ModelTrainer<Adam, BinaryCrossEntropy> {
        let model = Sequential::new([Layer::dense((2, 1), Some(ActFn::sigmoid(1.)))]);
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
        let params = model.init_params(&rng).unwrap();
        let adam = Adam::with_defaults(params.len(), 0.05, 0.5);
        ModelTrainer::new(model, params, adam, BinaryCrossEntropy::new()).unwrap()
    }

    #[test]
    fn learns_a_separable_problem() {
        let mut trainer = classifier(0);
        let x = array![[1., 1.], [2., 1.], [-1., -1.], [-1., -2.]];
        let y = array![[1.], [1.], [0.], [0.]];

        let first = trainer
            .train_on_batch(x.clone().into_dyn(), y.view())
            .unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = trainer
                .train_on_batch(x.clone().into_dyn(), y.view())
                .unwrap();
        }

        assert!(last.loss < first.loss);
        assert_eq!(last.accuracy, 1.);
        assert_eq!(trainer.updates(), 201);
    }

    #[test]
    fn wrong_params_len_fails() {
        let model = Sequential::new([Layer::dense((2, 1), None)]);
        let result =
            ModelTrainer::new(
            model,
            vec![0.; 2],
            Adam::with_defaults(2, 0.1, 0.5),
            BinaryCrossEntropy,
        );
        assert!(result.is_err());
    }

    #[test]
    fn stacked_training_only_updates_the_base() {
        let model = Sequential::new([Layer::dense((1, 2), None)]);
        let mut base = ModelTrainer::new(
            model,
            vec![1., 1., 0., 0.],
            Adam::with_defaults(4, 0.1, 0.5),
            BinaryCrossEntropy,
        )
        .unwrap();
        let mut head = classifier(1);
        let head_params = head.params().to_vec();

        let x = array![[1.], [2.]].into_dyn();
        let y = Array2::<f32>::ones((2, 1));
        base.train_stacked(&mut head.frozen(), x, y.view()).unwrap();

        assert_eq!(head.params(), head_params.as_slice());
        assert_eq!(head.updates(), 0);
        assert_eq!(base.updates(), 1);
        assert_ne!(base.params(), &[1., 1., 0., 0.]);
    }
}
