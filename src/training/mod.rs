mod gan;

pub use gan::{GanTrainer, StepReport, TrainerState};
