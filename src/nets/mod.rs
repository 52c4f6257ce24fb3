mod discriminator;
mod generator;

use ndarray::Array2;
use ndarray_rand::{rand_distr::StandardNormal, RandomExt};
use rand::Rng;

pub use discriminator::build_discriminator;
pub use generator::build_generator;

/// The side of every convolution kernel in both networks.
pub const KERNEL: usize = 3;

/// Draws `n` standard normal noise vectors of length `seed_size`, one per row.
pub fn noise<R: Rng>(n: usize, seed_size: usize, rng: &mut R) -> Array2<f32> {
    Array2::random_using((n, seed_size), StandardNormal, rng)
}
