use anyhow::Context;
use log::info;

use football_gan::{data, training::GanTrainer, GanConfig};

fn main() -> anyhow::Result<()> {
    football_gan::logger().init();

    let config = GanConfig::default();
    config.validate()?;
    football_gan::init(&config)?;

    let side = config.side();
    info!("will generate {side} px square images");

    let dataset = data::load_or_build(&config.data_path, side)
        .with_context(|| format!("loading training data from {}", config.data_path.display()))?;
    info!("loaded {} training images", dataset.len());

    let steps = config.steps;
    let mut trainer = GanTrainer::new(config, dataset)?;
    trainer.run(steps).context("training")?;

    info!(
        "done after {} steps, model saved to {}",
        trainer.steps_done(),
        trainer.config().model_path.display()
    );
    Ok(())
}
