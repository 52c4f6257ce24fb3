use serde::{Deserialize, Serialize};

/// The specification for the `ActFn` enum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnSpec {
    Sigmoid { amp: f32 },
    Relu,
    LeakyRelu { alpha: f32 },
    Tanh,
}

/// The specification for the `Layer` enum.
///
/// A list of these fully describes a `Sequential` architecture, it's what gets persisted next
/// to the parameters of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        dim: (usize, usize),
        act_fn: Option<ActFnSpec>,
    },
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
    },
    BatchNorm {
        channels: usize,
        momentum: f32,
        epsilon: f32,
    },
    UpSampling2d {
        factor: usize,
    },
    ZeroPadding2d {
        top: usize,
        bottom: usize,
        left: usize,
        right: usize,
    },
    Dropout {
        rate: f32,
    },
    Activation {
        act_fn: ActFnSpec,
    },
    Reshape {
        shape: Vec<usize>,
    },
    Flatten,
}
