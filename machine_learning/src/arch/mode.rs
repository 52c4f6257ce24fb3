/// How a forward pass should behave for the layers that act differently while training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Batch statistics are used and folded into the running ones, dropout is active.
    Train,
    /// Like `Train` but without touching any layer state other than the backward caches.
    Frozen,
    /// Running statistics are used and dropout is disabled.
    Infer,
}

impl Mode {
    /// Whether normalization layers should use the statistics of the current batch.
    pub fn uses_batch_stats(self) -> bool {
        matches!(self, Mode::Train | Mode::Frozen)
    }

    /// Whether normalization layers should update their running statistics.
    pub fn updates_running_stats(self) -> bool {
        self == Mode::Train
    }

    /// Whether dropout layers should drop units.
    pub fn drops(self) -> bool {
        matches!(self, Mode::Train | Mode::Frozen)
    }
}
