use crate::Result;

pub trait Optimizer {
    /// Updates `params` in place following `grad`.
    ///
    /// # Returns
    /// An error if `grad` and `params` differ in length.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}
