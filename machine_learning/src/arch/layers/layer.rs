use std::{cell::RefCell, rc::Rc};

use ndarray::ArrayD;
use rand::Rng;

use super::{
    Activation, BatchNorm, Conv2d, Dense, Dropout, Reshape, UpSampling2d, ZeroPadding2d,
};
use crate::{
    MlErr, Result,
    arch::{
        Mode,
        activations::ActFn,
        spec::LayerSpec,
    },
    initialization::{ConstParamGen, ParamGen, RandParamGen},
};

/// Keras' defaults for batch normalization.
pub const BATCH_NORM_MOMENTUM: f32 = 0.8;
pub const BATCH_NORM_EPSILON: f32 = 1e-3;

#[derive(Clone, Debug)]
pub enum Layer {
    Dense(Dense),
    Conv2d(Conv2d),
    BatchNorm(BatchNorm),
    UpSampling2d(UpSampling2d),
    ZeroPadding2d(ZeroPadding2d),
    Dropout(Dropout),
    Activation(Activation),
    Reshape(Reshape),
}

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(Dense::new(dim, act_fn))
    }

    pub fn conv2d(in_channels: usize, out_channels: usize, kernel: usize, stride: usize) -> Self {
        Self::Conv2d(Conv2d::new(in_channels, out_channels, kernel, stride))
    }

    pub fn batch_norm(channels: usize) -> Self {
        Self::BatchNorm(BatchNorm::new(
            channels,
            BATCH_NORM_MOMENTUM,
            BATCH_NORM_EPSILON,
        ))
    }

    pub fn upsampling(factor: usize) -> Self {
        Self::UpSampling2d(UpSampling2d::new(factor))
    }

    pub fn zero_padding(vertical: (usize, usize), horizontal: (usize, usize)) -> Self {
        Self::ZeroPadding2d(ZeroPadding2d::new(vertical, horizontal))
    }

    pub fn dropout(rate: f32, seed: u64) -> Result<Self> {
        Ok(Self::Dropout(Dropout::new(rate, seed)?))
    }

    pub fn activation(act_fn: ActFn) -> Self {
        Self::Activation(Activation::new(act_fn))
    }

    pub fn reshape(shape: Vec<usize>) -> Self {
        Self::Reshape(Reshape::new(shape))
    }

    pub fn flatten() -> Self {
        Self::Reshape(Reshape::flatten())
    }

    /// Returns the amount of parameters this layer owns in the model's flat buffer.
    pub fn size(&self) -> usize {
        match self {
            Self::Dense(l) => l.size(),
            Self::Conv2d(l) => l.size(),
            Self::BatchNorm(l) => l.size(),
            _ => 0,
        }
    }

    /// A short name for this kind of layer, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dense(_) => "dense",
            Self::Conv2d(_) => "conv2d",
            Self::BatchNorm(_) => "batch_norm",
            Self::UpSampling2d(_) => "upsampling2d",
            Self::ZeroPadding2d(_) => "zero_padding2d",
            Self::Dropout(_) => "dropout",
            Self::Activation(_) => "activation",
            Self::Reshape(l) if l.shape().is_none() => "flatten",
            Self::Reshape(_) => "reshape",
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>, mode: Mode) -> Result<ArrayD<f32>> {
        match self {
            Self::Dense(l) => l.forward(params, x),
            Self::Conv2d(l) => l.forward(params, x),
            Self::BatchNorm(l) => l.forward(params, x, mode),
            Self::UpSampling2d(l) => l.forward(x),
            Self::ZeroPadding2d(l) => l.forward(x),
            Self::Dropout(l) => Ok(l.forward(x, mode)),
            Self::Activation(l) => Ok(l.forward(x)),
            Self::Reshape(l) => l.forward(x),
        }
    }

    /// Propagates `d` back through this layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - Where to write this layer's gradient, `None` to only compute the input's delta.
    /// * `d` - The delta of this layer's output.
    ///
    /// # Returns
    /// The delta of this layer's input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: Option<&mut [f32]>,
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        match self {
            Self::Dense(l) => l.backward(params, grad, d),
            Self::Conv2d(l) => l.backward(params, grad, d),
            Self::BatchNorm(l) => l.backward(params, grad, d),
            Self::UpSampling2d(l) => l.backward(d),
            Self::ZeroPadding2d(l) => l.backward(d),
            Self::Dropout(l) => l.backward(d),
            Self::Activation(l) => l.backward(d),
            Self::Reshape(l) => l.backward(d),
        }
    }

    pub fn spec(&self) -> LayerSpec {
        match self {
            Self::Dense(l) => LayerSpec::Dense {
                dim: l.dim(),
                act_fn: l.act_fn().map(ActFn::spec),
            },
            Self::Conv2d(l) => LayerSpec::Conv2d {
                in_channels: l.in_channels(),
                out_channels: l.out_channels(),
                kernel: l.kernel(),
                stride: l.stride(),
            },
            Self::BatchNorm(l) => LayerSpec::BatchNorm {
                channels: l.channels(),
                momentum: l.momentum(),
                epsilon: l.epsilon(),
            },
            Self::UpSampling2d(l) => LayerSpec::UpSampling2d { factor: l.factor() },
            Self::ZeroPadding2d(l) => {
                let ((top, bottom), (left, right)) = l.padding();
                LayerSpec::ZeroPadding2d {
                    top,
                    bottom,
                    left,
                    right,
                }
            }
            Self::Dropout(l) => LayerSpec::Dropout { rate: l.rate() },
            Self::Activation(l) => LayerSpec::Activation {
                act_fn: l.act_fn().spec(),
            },
            Self::Reshape(l) => match l.shape() {
                Some(shape) => LayerSpec::Reshape {
                    shape: shape.to_vec(),
                },
                None => LayerSpec::Flatten,
            },
        }
    }

    /// Builds a layer from its specification.
    ///
    /// # Arguments
    /// * `spec` - The layer's specification.
    /// * `seed` - Seeds the layer's own randomness, only dropout layers use it.
    /// Rebuilds a layer from its specification.
    ///
    /// # Arguments
    /// * `spec` - The layer's specification, usually read back from a saved model.
    /// * `seed` - The seed for the layers that sample at forward time (dropout).
    ///
    /// # Returns
    /// `MlErr::InvalidLayer` if the specification has a zero dimension, stride, kernel or
    /// factor, or an out of range hyperparameter.
    pub fn from_spec(spec: LayerSpec, seed: u64) -> Result<Self> {
        let layer = match spec {
            LayerSpec::Dense { dim, act_fn } => {
                nonzero("dense", &[dim.0, dim.1])?;
                Self::dense(dim, act_fn.map(ActFn::from_spec))
            }
            LayerSpec::Conv2d {
                in_channels,
                out_channels,
                kernel,
                stride,
            } => {
                nonzero("conv2d", &[in_channels, out_channels, kernel, stride])?;
                Self::conv2d(in_channels, out_channels, kernel, stride)
            }
            LayerSpec::BatchNorm {
                channels,
                momentum,
                epsilon,
            } => {
                nonzero("batch_norm", &[channels])?;
                if !(0. ..=1.).contains(&momentum) || epsilon.is_nan() || epsilon <= 0. {
                    return Err(MlErr::InvalidLayer(format!(
                        "batch_norm needs a momentum in [0, 1] and a positive epsilon, got {momentum} and {epsilon}"
                    )));
                }
                Self::BatchNorm(BatchNorm::new(channels, momentum, epsilon))
            }
            LayerSpec::UpSampling2d { factor } => {
                nonzero("upsampling", &[factor])?;
                Self::upsampling(factor)
            }
            LayerSpec::ZeroPadding2d {
                top,
                bottom,
                left,
                right,
            } => Self::zero_padding((top, bottom), (left, right)),
            LayerSpec::Dropout { rate } => Self::dropout(rate, seed)?,
            LayerSpec::Activation { act_fn } => Self::activation(ActFn::from_spec(act_fn)),
            LayerSpec::Reshape { shape } => {
                if shape.is_empty() {
                    return Err(MlErr::InvalidLayer("reshape needs a target shape".into()));
                }
                nonzero("reshape", &shape)?;
                Self::reshape(shape)
            }
            LayerSpec::Flatten => Self::flatten(),
        };

        Ok(layer)
    }

    /// Returns the generators for this layer's initial parameters, in layout order.
    ///
    /// Kernels are Glorot uniform, biases and shifts start at zero and scales at one.
    pub fn param_gens<R: Rng + 'static>(
        &self,
        rng: &Rc<RefCell<R>>,
    ) -> Result<Vec<Box<dyn ParamGen>>> {
        let param_gens: Vec<Box<dyn ParamGen>> = match self {
            Self::Dense(l) => {
                let (fan_in, fan_out) = l.dim();
                vec![
                    Box::new(RandParamGen::xavier_uniform(
                        Rc::clone(rng),
                        fan_in * fan_out,
                        fan_in,
                        fan_out,
                    )?),
                    Box::new(ConstParamGen::new(0., fan_out)),
                ]
            }
            Self::Conv2d(l) => {
                let area = l.kernel() * l.kernel();
                let (fan_in, fan_out) = (area * l.in_channels(), area * l.out_channels());
                vec![
                    Box::new(RandParamGen::xavier_uniform(
                        Rc::clone(rng),
                        fan_in * l.out_channels(),
                        fan_in,
                        fan_out,
                    )?),
                    Box::new(ConstParamGen::new(0., l.out_channels())),
                ]
            }
            Self::BatchNorm(l) => vec![
                Box::new(ConstParamGen::new(1., l.channels())),
                Box::new(ConstParamGen::new(0., l.channels())),
            ],
            _ => Vec::new(),
        };

        Ok(param_gens)
    }
}

fn nonzero(kind: &str, values: &[usize]) -> Result<()> {
    if values.contains(&0) {
        return Err(MlErr::InvalidLayer(format!(
            "{kind} sizes must be positive, got {values:?}"
        )));
    }

    Ok(())
}
