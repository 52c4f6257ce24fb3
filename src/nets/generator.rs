use machine_learning::arch::{activations::ActFn, layers::Layer, Sequential};

use super::KERNEL;
use crate::{GanConfig, GanErr, Result};

/// Channels of the projected noise and of the fixed upsampling stages.
const WIDE_CHANNELS: usize = 256;
/// Channels of the stages added per unit of resolution multiplier.
const NARROW_CHANNELS: usize = 128;
const FIXED_STAGES: usize = 2;

/// Builds the generator: a noise vector of `seed_size` values to a
/// `(side, side, channels)` image in `[-1, 1]`.
///
/// The noise is projected into a `base × base × 256` feature map which is then doubled
/// in size `2 + resolution_multiplier` times, each time followed by a convolution, batch
/// normalization and ReLU. A last convolution maps the features to the image channels.
pub fn build_generator(config: &GanConfig) -> Result<Sequential> {
    let base = config.generator_base().ok_or_else(|| {
        GanErr::InvalidConfig(format!(
            "resolution multiplier {} can't produce {} px images",
            config.resolution_multiplier,
            config.side()
        ))
    })?;

    let mut layers = vec![
        Layer::dense(
            (config.seed_size, base * base * WIDE_CHANNELS),
            Some(ActFn::relu()),
        ),
        Layer::reshape(vec![base, base, WIDE_CHANNELS]),
    ];

    let widths = [WIDE_CHANNELS; FIXED_STAGES]
        .into_iter()
        .chain(std::iter::repeat_n(NARROW_CHANNELS, config.resolution_multiplier));

    let mut channels = WIDE_CHANNELS;
    for width in widths {
        layers.extend([
            Layer::upsampling(2),
            Layer::conv2d(channels, width, KERNEL, 1),
            Layer::batch_norm(width),
            Layer::activation(ActFn::relu()),
        ]);
        channels = width;
    }

    layers.extend([
        Layer::conv2d(channels, config.channels, KERNEL, 1),
        Layer::activation(ActFn::tanh()),
    ]);

    Ok(Sequential::new(layers))
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use machine_learning::arch::Mode;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::nets::noise;

    #[test]
    fn produces_bounded_images_of_the_configured_side() {
        let config = GanConfig {
            resolution_multiplier: 1,
            seed_size: 8,
            ..Default::default()
        };

        let mut generator = build_generator(&config).unwrap();
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(0)));
        let params = generator.init_params(&rng).unwrap();

        let seeds = noise(2, 8, &mut *rng.borrow_mut());
        let images = generator
            .forward(&params, seeds.into_dyn(), Mode::Infer)
            .unwrap();

        assert_eq!(images.shape(), &[2, 32, 32, 3]);
        assert!(images.iter().all(|v| (-1. ..=1.).contains(v)));
    }

    #[test]
    fn stage_count_follows_the_multiplier() {
        let upsamplings = |resolution_multiplier| {
            let config = GanConfig {
                resolution_multiplier,
                ..Default::default()
            };
            build_generator(&config)
                .unwrap()
                .layers()
                .iter()
                .filter(|layer| layer.kind() == "upsampling2d")
                .count()
        };

        assert_eq!(upsamplings(1), 3);
        assert_eq!(upsamplings(3), 5);
    }

    #[test]
    fn unreachable_side_is_rejected() {
        let config = GanConfig {
            resolution_multiplier: 5,
            ..Default::default()
        };
        assert!(build_generator(&config).is_err());
    }
}
