mod frozen;
mod model_trainer;
mod stats;

pub use frozen::Frozen;
pub use model_trainer::ModelTrainer;
pub use stats::BatchStats;
