use std::{collections::HashMap, fs, path::Path};

use log::info;
use machine_learning::arch::{layers::Layer, LayerSpec, Mode, Sequential};
use ndarray::{Array1, ArrayD};
use safetensors::{tensor::TensorView, Dtype, SafeTensors};

use crate::{GanConfig, GanErr, Result};

pub const PARAMS_TENSOR: &str = "params";
pub const ARCHITECTURE_KEY: &str = "architecture";
pub const CONFIG_KEY: &str = "config";

fn running_mean_name(layer: usize) -> String {
    format!("layers.{layer}.running_mean")
}

fn running_var_name(layer: usize) -> String {
    format!("layers.{layer}.running_var")
}

/// A model restored from disk, ready for inference.
#[derive(Debug, Clone)]
pub struct SavedModel {
    pub model: Sequential,
    pub params: Vec<f32>,
    /// The configuration of the run that produced the model, if it was recorded.
    pub config: Option<GanConfig>,
}

impl SavedModel {
    pub fn predict(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(self.model.forward(&self.params, x, Mode::Infer)?)
    }
}

/// Writes a model to a safetensors file: the flat parameters, the running statistics of every
/// batch normalization layer, and the architecture and run configuration as JSON metadata.
///
/// # Arguments
/// * `path` - The file to write, its parent directory is created if needed.
/// * `model` - The model's architecture and normalization state.
/// * `params` - The model's parameters.
/// * `config` - The configuration of the run that trained the model.
pub fn save_model(
    path: &Path,
    model: &Sequential,
    params: &[f32],
    config: &GanConfig,
) -> Result<()> {
    if params.len() != model.size() {
        return Err(GanErr::Ml(machine_learning::MlErr::SizeMismatch {
            what: "saved parameters",
            got: params.len(),
            expected: model.size(),
        }));
    }

    let mut stats = Vec::new();
    for (i, layer) in model.layers().iter().enumerate() {
        if let Layer::BatchNorm(bn) = layer {
            stats.push((running_mean_name(i), bn.running_mean().to_vec()));
            stats.push((running_var_name(i), bn.running_var().to_vec()));
        }
    }

    let mut tensors = vec![(
        PARAMS_TENSOR.to_string(),
        TensorView::new(
            Dtype::F32,
            vec![params.len()],
            bytemuck::cast_slice(params),
        )?,
    )];

    for (name, values) in &stats {
        let view = TensorView::new(
            Dtype::F32,
            vec![values.len()],
            bytemuck::cast_slice(values),
        )?;
        tensors.push((name.clone(), view));
    }

    let metadata = HashMap::from([
        (
            ARCHITECTURE_KEY.to_string(),
            serde_json::to_string(&model.specs())?,
        ),
        (CONFIG_KEY.to_string(), serde_json::to_string(config)?),
    ]);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(GanErr::io(parent))?;
    }

    safetensors::serialize_to_file(tensors, &Some(metadata), path)?;
    info!("saved model with {} parameters to {}", params.len(), path.display());
    Ok(())
}

/// Reads a model written by `save_model`.
pub fn load_model(path: &Path) -> Result<SavedModel> {
    let bytes = fs::read(path).map_err(GanErr::io(path))?;
    let missing = |name: &str| GanErr::MissingTensor {
        path: path.to_path_buf(),
        name: name.to_string(),
    };

    let (_, header) = SafeTensors::read_metadata(&bytes)?;
    let metadata = header.metadata().clone().unwrap_or_default();

    let architecture = metadata
        .get(ARCHITECTURE_KEY)
        .ok_or_else(|| missing(ARCHITECTURE_KEY))?;
    let specs: Vec<LayerSpec> = serde_json::from_str(architecture)?;
    let config = metadata
        .get(CONFIG_KEY)
        .map(|raw| serde_json::from_str(raw))
        .transpose()?;

    let tensors = SafeTensors::deserialize(&bytes)?;
    let read = |name: &str| -> Result<Vec<f32>> {
        let tensor = tensors.tensor(name).map_err(|_| missing(name))?;
        if tensor.dtype() != Dtype::F32 {
            return Err(GanErr::TensorMismatch {
                path: path.to_path_buf(),
                name: name.to_string(),
                found: format!("{:?}", tensor.dtype()),
                expected: "F32".into(),
            });
        }

        Ok(tensor
            .data()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect())
    };

    let mut model = Sequential::from_specs(specs, 0)?;
    let params = read(PARAMS_TENSOR)?;
    if params.len() != model.size() {
        return Err(GanErr::Ml(machine_learning::MlErr::SizeMismatch {
            what: "loaded parameters",
            got: params.len(),
            expected: model.size(),
        }));
    }

    for (i, layer) in model.layers_mut().iter_mut().enumerate() {
        if let Layer::BatchNorm(bn) = layer {
            let mean = Array1::from(read(&running_mean_name(i))?);
            let var = Array1::from(read(&running_var_name(i))?);
            bn.set_running_stats(mean, var)?;
        }
    }

    Ok(SavedModel {
        model,
        params,
        config,
    })
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use machine_learning::arch::activations::ActFn;
    use ndarray::Array4;
    use rand::{rngs::StdRng, SeedableRng};
    use tempfile::tempdir;

    use super::*;

    fn trained_model() -> (Sequential, Vec<f32>) {
        let mut model = Sequential::new([
            Layer::conv2d(3, 4, 3, 2),
            Layer::batch_norm(4),
            Layer::activation(ActFn::relu()),
            Layer::flatten(),
            Layer::dense((4 * 4 * 4, 1), Some(ActFn::sigmoid(1.))),
        ]);

        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(5)));
        let params = model.init_params(&rng).unwrap();

        // Moves the running statistics away from their initial values.
        let x = Array4::from_shape_fn((2, 8, 8, 3), |(n, y, x, c)| (n + y + x + c) as f32 / 10.);
        model.forward(&params, x.into_dyn(), Mode::Train).unwrap();
        (model, params)
    }

    #[test]
    fn reloaded_model_predicts_the_same() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("model.safetensors");
        let (mut model, params) = trained_model();
        let config = GanConfig::default();

        save_model(&path, &model, &params, &config).unwrap();
        let mut saved = load_model(&path).unwrap();

        let x = Array4::from_shape_fn((3, 8, 8, 3), |(n, y, x, c)| ((n * y + x * c) % 5) as f32 / 5.)
            .into_dyn();
        let expected = model.forward(&params, x.clone(), Mode::Infer).unwrap();

        assert_eq!(saved.params, params);
        assert_eq!(saved.config, Some(config));
        assert_eq!(saved.model.specs(), model.specs());
        assert_eq!(saved.predict(x).unwrap(), expected);
    }

    #[test]
    fn missing_architecture_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bare.safetensors");
        let values = [0f32; 4];
        let view = TensorView::new(Dtype::F32, vec![4], bytemuck::cast_slice(&values)).unwrap();
        safetensors::serialize_to_file([(PARAMS_TENSOR, view)], &None, &path).unwrap();

        assert!(matches!(
            load_model(&path),
            Err(GanErr::MissingTensor { .. })
        ));
    }

    fn write_raw_model(path: &Path, specs: &[LayerSpec], dtype: Dtype, len: usize, bytes: &[u8]) {
        let view = TensorView::new(dtype, vec![len], bytes).unwrap();
        let metadata = HashMap::from([(
            ARCHITECTURE_KEY.to_string(),
            serde_json::to_string(specs).unwrap(),
        )]);
        safetensors::serialize_to_file([(PARAMS_TENSOR, view)], &Some(metadata), path).unwrap();
    }

    #[test]
    fn zero_stride_architecture_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strided.safetensors");
        let specs = [LayerSpec::Conv2d {
            in_channels: 3,
            out_channels: 4,
            kernel: 3,
            stride: 0,
        }];
        let values = [0f32; 4 * 27 + 4];
        write_raw_model(&path, &specs, Dtype::F32, values.len(), bytemuck::cast_slice(&values));

        assert!(matches!(
            load_model(&path),
            Err(GanErr::Ml(machine_learning::MlErr::InvalidLayer(_)))
        ));
    }

    #[test]
    fn non_f32_params_are_a_tensor_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("halves.safetensors");
        let specs = [LayerSpec::Dense {
            dim: (1, 1),
            act_fn: None,
        }];
        write_raw_model(&path, &specs, Dtype::F64, 2, bytemuck::cast_slice(&[0f64; 2]));

        let Err(GanErr::TensorMismatch { name, found, .. }) = load_model(&path) else {
            panic!("an F64 parameter tensor was accepted");
        };
        assert_eq!(name, PARAMS_TENSOR);
        assert_eq!(found, "F64");
    }
}
