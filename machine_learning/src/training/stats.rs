/// The loss and accuracy measured on a single training batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    pub loss: f32,
    pub accuracy: f32,
}

impl BatchStats {
    pub fn new(loss: f32, accuracy: f32) -> Self {
        Self { loss, accuracy }
    }

    /// Averages two measurements taken on equally sized batches.
    pub fn mean(self, other: Self) -> Self {
        Self {
            loss: (self.loss + other.loss) / 2.,
            accuracy: (self.accuracy + other.accuracy) / 2.,
        }
    }
}
