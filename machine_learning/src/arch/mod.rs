pub mod activations;
pub mod layers;
pub mod loss;
mod mode;
mod sequential;
mod spec;

pub use mode::Mode;
pub use sequential::Sequential;
pub use spec::{ActFnSpec, LayerSpec};
