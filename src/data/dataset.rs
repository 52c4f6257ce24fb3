use ndarray::prelude::*;
use rand::Rng;

use crate::{GanErr, Result};

/// The preprocessed training images, a `(count, side, side, channels)` tensor.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    images: Array4<f32>,
}

impl ImageDataset {
    /// Creates a new `ImageDataset`.
    ///
    /// # Returns
    /// An error if there are no images.
    pub fn new(images: Array4<f32>) -> Result<Self> {
        if images.is_empty() {
            return Err(GanErr::ShapeMismatch {
                what: "training images",
                found: images.shape().to_vec(),
                expected: "at least one image with pixels".into(),
            });
        }

        Ok(Self { images })
    }

    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The shape of a single image, `(side, side, channels)`.
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let (_, h, w, c) = self.images.dim();
        (h, w, c)
    }

    pub fn images(&self) -> ArrayView4<'_, f32> {
        self.images.view()
    }

    /// Draws `batch_size` images uniformly at random, with replacement.
    ///
    /// The batch is always full, even when the dataset holds fewer images.
    pub fn sample<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Array4<f32> {
        let len = self.len();
        let indices: Vec<_> = (0..batch_size).map(|_| rng.random_range(0..len)).collect();
        self.images.select(Axis(0), &indices)
    }

    /// Iterates once over the whole dataset in batches, shuffled through a buffer of
    /// `buffer_size` images: each image is drawn at random from the buffer, which is then
    /// refilled with the next image in order.
    ///
    /// # Arguments
    /// * `buffer_size` - The size of the shuffle buffer, a full shuffle when it's at least
    ///   the dataset's length.
    /// * `batch_size` - The size of the batches, the last one may be smaller.
    /// * `rng` - A random number generator.
    pub fn shuffled_batches<'a, R: Rng>(
        &'a self,
        buffer_size: usize,
        batch_size: usize,
        rng: &'a mut R,
    ) -> ShuffledBatches<'a, R> {
        let buffer_size = buffer_size.clamp(1, self.len());

        ShuffledBatches {
            images: self.images.view(),
            buffer: (0..buffer_size).collect(),
            next: buffer_size,
            batch_size: batch_size.max(1),
            rng,
        }
    }
}

/// Iterator over shuffled batches, see `ImageDataset::shuffled_batches`.
pub struct ShuffledBatches<'a, R: Rng> {
    images: ArrayView4<'a, f32>,
    buffer: Vec<usize>,
    next: usize,
    batch_size: usize,
    rng: &'a mut R,
}

impl<R: Rng> ShuffledBatches<'_, R> {
    fn draw(&mut self) -> Option<usize> {
        if self.buffer.is_empty() {
            return None;
        }

        let slot = self.rng.random_range(0..self.buffer.len());
        let index = if self.next < self.images.len_of(Axis(0)) {
            let index = std::mem::replace(&mut self.buffer[slot], self.next);
            self.next += 1;
            index
        } else {
            self.buffer.swap_remove(slot)
        };

        Some(index)
    }
}

impl<R: Rng> Iterator for ShuffledBatches<'_, R> {
    type Item = Array4<f32>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices: Vec<_> = (0..self.batch_size).map_while(|_| self.draw()).collect();
        if indices.is_empty() {
            return None;
        }

        Some(self.images.select(Axis(0), &indices))
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    /// Every image is filled with its own index.
    fn indexed_dataset(len: usize) -> ImageDataset {
        let images = Array4::from_shape_fn((len, 2, 2, 3), |(i, ..)| i as f32);
        ImageDataset::new(images).unwrap()
    }

    #[test]
    fn no_images_is_a_shape_mismatch() {
        let result = ImageDataset::new(Array4::zeros((0, 2, 2, 3)));
        assert!(matches!(
            result,
            Err(GanErr::ShapeMismatch { found, .. }) if found == [0, 2, 2, 3]
        ));
    }

    #[test]
    fn sample_is_always_full() {
        let dataset = indexed_dataset(3);
        let mut rng = StdRng::seed_from_u64(0);

        let batch = dataset.sample(8, &mut rng);
        assert_eq!(batch.shape(), &[8, 2, 2, 3]);
        assert!(batch.iter().all(|&v| v < 3.));
    }

    #[test]
    fn shuffled_batches_visit_every_image_once() {
        let dataset = indexed_dataset(10);
        let mut rng = StdRng::seed_from_u64(1);

        let batches: Vec<_> = dataset.shuffled_batches(4, 3, &mut rng).collect();
        let sizes: Vec<_> = batches.iter().map(|b| b.len_of(Axis(0))).collect();
        assert_eq!(sizes, [3, 3, 3, 1]);

        let mut seen: Vec<_> = batches
            .iter()
            .flat_map(|b| b.outer_iter().map(|image| image[[0, 0, 0]] as usize).collect::<Vec<_>>())
            .collect();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }
}
