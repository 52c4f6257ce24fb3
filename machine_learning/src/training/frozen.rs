use ndarray::ArrayD;

use crate::{
    Result,
    arch::{Mode, Sequential},
};

/// A read only view of a model used as the tail of a stacked model.
///
/// Passes through it behave like training passes (batch statistics, dropout), but its
/// parameters receive no gradient and its running statistics are not updated.
pub struct Frozen<'a> {
    model: &'a mut Sequential,
    params: &'a [f32],
}

impl<'a> Frozen<'a> {
    pub fn new(model: &'a mut Sequential, params: &'a [f32]) -> Self {
        Self { model, params }
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.model.forward(self.params, x, Mode::Frozen)
    }

    /// Backpropagates `d` to the frozen model's input.
    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.model.backward(self.params, None, d)
    }
}
