use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{preview::Grid, GanErr, Result};

/// Side of the generated images per unit of resolution multiplier.
pub const SIDE_PER_MULTIPLIER: usize = 32;

pub const RESOLUTION_MULTIPLIER: usize = 2;
pub const MAX_RESOLUTION_MULTIPLIER: usize = 8;
pub const IMAGE_CHANNELS: usize = 3;

pub const PREVIEW_ROWS: usize = 4;
pub const PREVIEW_COLS: usize = 7;
pub const PREVIEW_MARGIN: usize = 16;
/// The largest width or height of a preview sheet, in pixels.
pub const MAX_PREVIEW_SIDE: u32 = 16384;
pub const SAVE_FREQ: usize = 10;

pub const SEED_SIZE: usize = 100;

pub const DATA_PATH: &str = "dataset/";
pub const STEPS: usize = 10000;
pub const BATCH_SIZE: usize = 32;
pub const BUFFER_SIZE: usize = 60000;

pub const LEARNING_RATE: f32 = 1.5e-4;
pub const BETA1: f32 = 0.5;

pub const OUTPUT_DIR: &str = "dataset/gen_images";
pub const MODEL_PATH: &str = "dataset/gen_images.safetensors";

/// Everything that parametrizes a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GanConfig {
    /// The generated side is `32 * resolution_multiplier` pixels.
    pub resolution_multiplier: usize,
    pub channels: usize,

    pub preview_rows: usize,
    pub preview_cols: usize,
    pub preview_margin: usize,
    /// A preview is written every `save_freq` steps.
    pub save_freq: usize,

    /// The length of the generator's noise vectors.
    pub seed_size: usize,

    pub data_path: PathBuf,
    pub steps: usize,
    pub batch_size: usize,
    pub buffer_size: usize,

    pub learning_rate: f32,
    pub beta1: f32,

    pub output_dir: PathBuf,
    pub model_path: PathBuf,

    /// Seeds every random draw of the run, taken from the OS when `None`.
    pub seed: Option<u64>,
    /// Size of the rayon pool, rayon's default when `None`.
    pub threads: Option<usize>,
}

impl Default for GanConfig {
    fn default() -> Self {
        Self {
            resolution_multiplier: RESOLUTION_MULTIPLIER,
            channels: IMAGE_CHANNELS,
            preview_rows: PREVIEW_ROWS,
            preview_cols: PREVIEW_COLS,
            preview_margin: PREVIEW_MARGIN,
            save_freq: SAVE_FREQ,
            seed_size: SEED_SIZE,
            data_path: PathBuf::from(DATA_PATH),
            steps: STEPS,
            batch_size: BATCH_SIZE,
            buffer_size: BUFFER_SIZE,
            learning_rate: LEARNING_RATE,
            beta1: BETA1,
            output_dir: PathBuf::from(OUTPUT_DIR),
            model_path: PathBuf::from(MODEL_PATH),
            seed: None,
            threads: None,
        }
    }
}

impl GanConfig {
    /// Reads a configuration from a JSON file, missing fields take their default value.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(GanErr::io(path))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The side of the square images, in pixels.
    pub fn side(&self) -> usize {
        SIDE_PER_MULTIPLIER * self.resolution_multiplier
    }

    /// The side of the generator's first feature map, the output side halved once per
    /// upsampling stage.
    ///
    /// # Returns
    /// `None` if the side can't be reached by doubling an integer base.
    pub fn generator_base(&self) -> Option<usize> {
        let upsamplings = u32::try_from(self.resolution_multiplier)
            .ok()?
            .checked_add(2)?;
        let divisor = 2usize.checked_pow(upsamplings)?;
        let side = SIDE_PER_MULTIPLIER.checked_mul(self.resolution_multiplier)?;

        (side % divisor == 0 && side >= divisor).then(|| side / divisor)
    }

    /// The layout of the preview sheets.
    pub fn preview_grid(&self) -> Grid {
        Grid {
            rows: self.preview_rows,
            cols: self.preview_cols,
            margin: self.preview_margin,
        }
    }

    /// The amount of images in a preview.
    pub fn preview_count(&self) -> usize {
        self.preview_rows * self.preview_cols
    }

    /// Checks that the configuration describes a trainable run.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("resolution_multiplier", self.resolution_multiplier),
            ("channels", self.channels),
            ("preview_rows", self.preview_rows),
            ("preview_cols", self.preview_cols),
            ("save_freq", self.save_freq),
            ("seed_size", self.seed_size),
            ("batch_size", self.batch_size),
            ("buffer_size", self.buffer_size),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(GanErr::InvalidConfig(format!("{name} must be positive")));
            }
        }

        if self.resolution_multiplier > MAX_RESOLUTION_MULTIPLIER {
            return Err(GanErr::InvalidConfig(format!(
                "resolution_multiplier must be at most {MAX_RESOLUTION_MULTIPLIER}, got {}",
                self.resolution_multiplier
            )));
        }

        if self.generator_base().is_none() {
            return Err(GanErr::InvalidConfig(format!(
                "resolution multiplier {} can't produce {} px images",
                self.resolution_multiplier,
                self.side()
            )));
        }

        let fits = self
            .preview_grid()
            .canvas_size(self.side())
            .is_some_and(|(w, h)| w <= MAX_PREVIEW_SIDE && h <= MAX_PREVIEW_SIDE);
        if !fits {
            return Err(GanErr::InvalidConfig(format!(
                "a {}x{} preview with a {} px margin is wider than {MAX_PREVIEW_SIDE} px",
                self.preview_rows, self.preview_cols, self.preview_margin
            )));
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.) {
            return Err(GanErr::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }

        if !(0. ..1.).contains(&self.beta1) {
            return Err(GanErr::InvalidConfig(format!(
                "beta1 must be in [0, 1), got {}",
                self.beta1
            )));
        }

        if self.threads == Some(0) {
            return Err(GanErr::InvalidConfig("threads must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GanConfig::default();
        config.validate().unwrap();
        assert_eq!(config.side(), 64);
        assert_eq!(config.preview_count(), 28);
    }

    #[test]
    fn generator_base_per_multiplier() {
        let base = |resolution_multiplier| {
            GanConfig {
                resolution_multiplier,
                ..Default::default()
            }
            .generator_base()
        };

        assert_eq!(base(1), Some(4));
        assert_eq!(base(2), Some(4));
        assert_eq!(base(3), Some(3));
        assert_eq!(base(5), None);
        assert_eq!(base(usize::MAX), None);
    }

    #[test]
    fn oversized_multiplier_is_invalid() {
        let config = GanConfig {
            resolution_multiplier: MAX_RESOLUTION_MULTIPLIER + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GanErr::InvalidConfig(_))));

        let config = GanConfig {
            resolution_multiplier: usize::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GanErr::InvalidConfig(_))));
    }

    #[test]
    fn preview_must_fit_its_canvas() {
        let huge_margin = GanConfig {
            preview_margin: usize::MAX / 2,
            ..Default::default()
        };
        assert!(matches!(huge_margin.validate(), Err(GanErr::InvalidConfig(_))));

        let wide = GanConfig {
            preview_cols: 1000,
            ..Default::default()
        };
        assert!(matches!(wide.validate(), Err(GanErr::InvalidConfig(_))));

        let (w, h) = GanConfig::default()
            .preview_grid()
            .canvas_size(64)
            .unwrap();
        assert_eq!((w, h), (16 + 7 * 80, 16 + 4 * 80));
    }

    #[test]
    fn zero_batch_is_invalid() {
        let config = GanConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GanErr::InvalidConfig(_))));
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: GanConfig = serde_json::from_str(r#"{ "steps": 5, "seed": 7 }"#).unwrap();
        assert_eq!(config.steps, 5);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.batch_size, BATCH_SIZE);
    }
}
