mod activation;
mod batch_norm;
mod conv2d;
mod dense;
mod dropout;
mod layer;
mod reshape;
mod upsampling;
mod zero_padding;

pub use activation::Activation;
pub use batch_norm::BatchNorm;
pub use conv2d::Conv2d;
pub use dense::Dense;
pub use dropout::Dropout;
pub use layer::Layer;
pub use reshape::Reshape;
pub use upsampling::UpSampling2d;
pub use zero_padding::ZeroPadding2d;
