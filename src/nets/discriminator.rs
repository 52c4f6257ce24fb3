use machine_learning::arch::{activations::ActFn, layers::Layer, Sequential};
use rand::Rng;

use super::KERNEL;
use crate::{GanConfig, Result};

const LEAKY_ALPHA: f32 = 0.2;
const DROPOUT_RATE: f32 = 0.25;

/// Builds the discriminator: a `(side, side, channels)` image to the probability of it
/// being real.
///
/// # Arguments
/// * `config` - The run's configuration, for the image shape.
/// * `rng` - Seeds the dropout layers.
pub fn build_discriminator<R: Rng>(config: &GanConfig, rng: &mut R) -> Result<Sequential> {
    let mut side = config.side();
    let mut layers = Vec::new();

    // (filters, stride, pad bottom right)
    let stages = [
        (32, 2, false),
        (64, 2, true),
        (128, 2, false),
        (256, 1, false),
        (512, 1, false),
    ];

    let mut channels = config.channels;
    for (i, (filters, stride, pad)) in stages.into_iter().enumerate() {
        let conv = Layer::conv2d(channels, filters, KERNEL, stride);
        side = side.div_ceil(stride);
        layers.push(conv);

        if pad {
            layers.push(Layer::zero_padding((0, 1), (0, 1)));
            side += 1;
        }

        if i > 0 {
            layers.push(Layer::batch_norm(filters));
        }

        layers.extend([
            Layer::activation(ActFn::leaky_relu(LEAKY_ALPHA)),
            Layer::dropout(DROPOUT_RATE, rng.random())?,
        ]);
        channels = filters;
    }

    layers.extend([
        Layer::flatten(),
        Layer::dense((side * side * channels, 1), Some(ActFn::sigmoid(1.))),
    ]);

    Ok(Sequential::new(layers))
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use machine_learning::arch::Mode;
    use ndarray::Array4;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn outputs_one_probability_per_image() {
        let config = GanConfig {
            resolution_multiplier: 1,
            ..Default::default()
        };

        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(0)));
        let mut discriminator = build_discriminator(&config, &mut *rng.borrow_mut()).unwrap();
        let params = discriminator.init_params(&rng).unwrap();

        let images = Array4::from_shape_fn((3, 32, 32, 3), |(n, y, x, c)| {
            ((n + y * 3 + x * 5 + c) % 7) as f32 / 3.5 - 1.
        });

        for mode in [Mode::Infer, Mode::Train] {
            let p = discriminator
                .forward(&params, images.clone().into_dyn(), mode)
                .unwrap();
            assert_eq!(p.shape(), &[3, 1]);
            assert!(p.iter().all(|v| (0. ..=1.).contains(v)));
        }
    }
}
