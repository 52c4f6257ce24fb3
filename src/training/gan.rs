use std::{cell::RefCell, rc::Rc, time::Instant};

use log::{debug, info};
use machine_learning::{
    arch::{loss::BinaryCrossEntropy, Sequential},
    optimization::Adam,
    training::{BatchStats, ModelTrainer},
};
use ndarray::{Array2, Ix4};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    data::ImageDataset,
    nets::{self, build_discriminator, build_generator},
    persist,
    preview,
    timing::hms_string,
    GanConfig, GanErr, Result,
};

type Trainer = ModelTrainer<Adam, BinaryCrossEntropy>;

/// Where a `GanTrainer` is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Initializing,
    TrainingStep,
    Checkpointing,
    Done,
}

/// The metrics of a single training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub step: usize,
    /// The mean of the metrics on the real and on the generated batch.
    pub discriminator: BatchStats,
    pub generator: BatchStats,
}

/// Trains a generator against a discriminator on a dataset of images.
///
/// Each step trains the discriminator on a batch of real images and a batch of generated
/// ones, then trains the generator through the frozen discriminator. Every `save_freq` steps
/// a preview of the generator's output on a fixed batch of seeds is written.
pub struct GanTrainer {
    config: GanConfig,
    dataset: ImageDataset,
    generator: Trainer,
    discriminator: Trainer,
    preview_seeds: Array2<f32>,
    rng: StdRng,

    state: TrainerState,
    step: usize,
    checkpoint: usize,
}

impl GanTrainer {
    /// Creates a new `GanTrainer` with the generator and discriminator described by `config`.
    ///
    /// # Arguments
    /// * `config` - The run's configuration.
    /// * `dataset` - The real images, of the configured side.
    pub fn new(config: GanConfig, dataset: ImageDataset) -> Result<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let generator = build_generator(&config)?;
        let discriminator = build_discriminator(&config, &mut rng)?;
        Self::with_models(config, dataset, generator, discriminator, rng)
    }

    /// Creates a new `GanTrainer` around custom models.
    ///
    /// # Arguments
    /// * `config` - The run's configuration.
    /// * `dataset` - The real images, of the configured side.
    /// * `generator` - Maps `(n, seed_size)` noise to `(n, side, side, channels)` images.
    /// * `discriminator` - Maps `(n, side, side, channels)` images to `(n, 1)` probabilities.
    /// * `rng` - Drives the parameter initialization and every sampling during training.
    pub fn with_models(
        config: GanConfig,
        dataset: ImageDataset,
        generator: Sequential,
        discriminator: Sequential,
        mut rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;

        let side = config.side();
        if dataset.image_shape() != (side, side, config.channels) {
            return Err(GanErr::InvalidConfig(format!(
                "expected {side}x{side}x{} images, the dataset has {:?}",
                config.channels,
                dataset.image_shape()
            )));
        }

        let init_rng = Rc::new(RefCell::new(StdRng::seed_from_u64(rng.random())));
        let generator = Self::trainer(generator, &init_rng, &config)?;
        let discriminator = Self::trainer(discriminator, &init_rng, &config)?;
        let preview_seeds = nets::noise(config.preview_count(), config.seed_size, &mut rng);

        info!(
            "will generate {side} px square images, generator has {} parameters and discriminator {}",
            generator.params().len(),
            discriminator.params().len()
        );

        Ok(Self {
            config,
            dataset,
            generator,
            discriminator,
            preview_seeds,
            rng,
            state: TrainerState::Initializing,
            step: 0,
            checkpoint: 1,
        })
    }

    fn trainer(
        model: Sequential,
        init_rng: &Rc<RefCell<StdRng>>,
        config: &GanConfig,
    ) -> Result<Trainer> {
        let params = model.init_params(init_rng)?;
        let adam = Adam::with_defaults(params.len(), config.learning_rate, config.beta1);
        Ok(ModelTrainer::new(
            model,
            params,
            adam,
            BinaryCrossEntropy::new(),
        )?)
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn config(&self) -> &GanConfig {
        &self.config
    }

    /// The amount of steps completed so far.
    pub fn steps_done(&self) -> usize {
        self.step
    }

    /// The amount of previews written so far.
    pub fn previews_written(&self) -> usize {
        self.checkpoint - 1
    }

    pub fn discriminator_updates(&self) -> usize {
        self.discriminator.updates()
    }

    pub fn generator_updates(&self) -> usize {
        self.generator.updates()
    }

    pub fn generator(&self) -> &Trainer {
        &self.generator
    }

    pub fn discriminator(&self) -> &Trainer {
        &self.discriminator
    }

    /// Trains the discriminator on a batch of real images labelled as real, then on a batch
    /// of generated images labelled as fake.
    ///
    /// # Returns
    /// The mean of the metrics on both batches.
    pub fn train_discriminator(&mut self) -> Result<BatchStats> {
        let batch_size = self.config.batch_size;
        let reals = self.dataset.sample(batch_size, &mut self.rng);

        let seeds = nets::noise(batch_size, self.config.seed_size, &mut self.rng);
        let fakes = self.generator.predict(seeds.into_dyn())?;

        let real = self
            .discriminator
            .train_on_batch(reals.into_dyn(), Array2::ones((batch_size, 1)).view())?;
        let fake = self
            .discriminator
            .train_on_batch(fakes, Array2::zeros((batch_size, 1)).view())?;

        Ok(real.mean(fake))
    }

    /// Trains the generator on a fresh batch of seeds through the frozen discriminator,
    /// aiming for its images to be taken as real.
    pub fn train_generator(&mut self) -> Result<BatchStats> {
        let batch_size = self.config.batch_size;
        let seeds = nets::noise(batch_size, self.config.seed_size, &mut self.rng);

        let mut head = self.discriminator.frozen();
        let stats = self.generator.train_stacked(
            &mut head,
            seeds.into_dyn(),
            Array2::ones((batch_size, 1)).view(),
        )?;

        Ok(stats)
    }

    /// Runs a single training step, writing a preview if it's a checkpoint step.
    pub fn step(&mut self) -> Result<StepReport> {
        if self.state == TrainerState::Done {
            return Err(GanErr::TrainingFinished);
        }

        self.state = TrainerState::TrainingStep;
        let discriminator = self.train_discriminator()?;
        let generator = self.train_generator()?;

        let report = StepReport {
            step: self.step,
            discriminator,
            generator,
        };
        info!("step {}", report.step);
        debug!("{report:?}");

        if self.step % self.config.save_freq == 0 {
            self.state = TrainerState::Checkpointing;
            self.save_preview()?;
            info!(
                "step {}, discriminator loss {:.4} accuracy {:.4}, generator loss {:.4} accuracy {:.4}",
                report.step,
                discriminator.loss,
                discriminator.accuracy,
                generator.loss,
                generator.accuracy
            );
            self.state = TrainerState::TrainingStep;
        }

        self.step += 1;
        Ok(report)
    }

    /// Runs `steps` training steps and saves the final generator to the configured model path.
    ///
    /// # Returns
    /// The report of the last step, if any step was run.
    pub fn run(&mut self, steps: usize) -> Result<Option<StepReport>> {
        let start = Instant::now();
        let mut last = None;

        for _ in 0..steps {
            last = Some(self.step()?);
        }

        persist::save_model(
            &self.config.model_path,
            self.generator.model(),
            self.generator.params(),
            &self.config,
        )?;

        self.state = TrainerState::Done;
        info!("training time: {}", hms_string(start.elapsed()));
        Ok(last)
    }

    fn save_preview(&mut self) -> Result<()> {
        let images = self
            .generator
            .predict(self.preview_seeds.clone().into_dyn())?
            .into_dimensionality::<Ix4>()?;

        let path = preview::save_preview(
            images.view(),
            self.config.preview_grid(),
            &self.config.output_dir,
            self.checkpoint,
        )?;
        debug!("wrote {}", path.display());

        self.checkpoint += 1;
        Ok(())
    }
}
