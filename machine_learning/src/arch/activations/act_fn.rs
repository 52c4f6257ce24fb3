use super::{LeakyRelu, Relu, Sigmoid, Tanh};
use crate::arch::spec::ActFnSpec;

#[derive(Clone, Debug)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Relu(Relu),
    LeakyRelu(LeakyRelu),
    Tanh(Tanh),
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        Self::Sigmoid(Sigmoid::new(amp))
    }

    pub fn relu() -> Self {
        Self::Relu(Relu)
    }

    pub fn leaky_relu(alpha: f32) -> Self {
        Self::LeakyRelu(LeakyRelu::new(alpha))
    }

    pub fn tanh() -> Self {
        Self::Tanh(Tanh)
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            Self::Sigmoid(a) => a.f(x),
            Self::Relu(a) => a.f(x),
            Self::LeakyRelu(a) => a.f(x),
            Self::Tanh(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Self::Sigmoid(a) => a.df(x),
            Self::Relu(a) => a.df(x),
            Self::LeakyRelu(a) => a.df(x),
            Self::Tanh(a) => a.df(x),
        }
    }

    pub fn spec(&self) -> ActFnSpec {
        match self {
            Self::Sigmoid(a) => ActFnSpec::Sigmoid { amp: a.amp() },
            Self::Relu(_) => ActFnSpec::Relu,
            Self::LeakyRelu(a) => ActFnSpec::LeakyRelu { alpha: a.alpha() },
            Self::Tanh(_) => ActFnSpec::Tanh,
        }
    }

    pub fn from_spec(spec: ActFnSpec) -> Self {
        match spec {
            ActFnSpec::Sigmoid { amp } => Self::sigmoid(amp),
            ActFnSpec::Relu => Self::relu(),
            ActFnSpec::LeakyRelu { alpha } => Self::leaky_relu(alpha),
            ActFnSpec::Tanh => Self::tanh(),
        }
    }
}
