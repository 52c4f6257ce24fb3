use ndarray::ArrayD;

use crate::{MlErr, Result, arch::activations::ActFn};

/// An element-wise activation applied as a standalone layer.
#[derive(Clone, Debug)]
pub struct Activation {
    act_fn: ActFn,
    z: Option<ArrayD<f32>>,
}

impl Activation {
    pub fn new(act_fn: ActFn) -> Self {
        Self { act_fn, z: None }
    }

    pub fn act_fn(&self) -> &ActFn {
        &self.act_fn
    }

    pub fn forward(&mut self, z: ArrayD<f32>) -> ArrayD<f32> {
        let a = z.mapv(|z| self.act_fn.f(z));
        self.z = Some(z);
        a
    }

    pub fn backward(&mut self, mut d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let z = self
            .z
            .as_ref()
            .ok_or(MlErr::MissingForwardPass { layer: "activation" })?;

        if z.shape() != d.shape() {
            return Err(MlErr::ShapeMismatch {
                what: "activation delta",
                got: d.shape().to_vec(),
                expected: z.shape().to_vec(),
            });
        }

        d.zip_mut_with(z, |d, &z| *d *= self.act_fn.df(z));
        Ok(d)
    }
}
