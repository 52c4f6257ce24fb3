mod cache;
mod dataset;

pub use cache::{SOURCE_DIR, TENSOR_NAME, build_images, cache_path, load_or_build};
pub use dataset::{ImageDataset, ShuffledBatches};
