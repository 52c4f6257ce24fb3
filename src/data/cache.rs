use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use image::imageops::FilterType;
use log::{debug, info};
use ndarray::Array4;
use rayon::prelude::*;
use safetensors::{tensor::TensorView, Dtype, SafeTensors};

use super::ImageDataset;
use crate::{timing::hms_string, GanErr, Result};

/// The directory, relative to the data path, the source images are read from.
pub const SOURCE_DIR: &str = "training_images";
/// The name of the cached tensor inside its safetensors file.
pub const TENSOR_NAME: &str = "images";

const CHANNELS: usize = 3;

/// Returns the path of the cache file for images of `side × side` pixels.
pub fn cache_path(data_path: &Path, side: usize) -> PathBuf {
    data_path.join(format!("training_data_{side}_{side}.safetensors"))
}

/// Loads the training images resized to `side × side`, from the cache file if there's one
/// and from the source directory otherwise, in which case the cache file gets written.
///
/// # Arguments
/// * `data_path` - The directory holding the cache files and the source directory.
/// * `side` - The side the images are resized to.
///
/// # Returns
/// The dataset or an error if any image couldn't be read or the cache is malformed.
pub fn load_or_build(data_path: &Path, side: usize) -> Result<ImageDataset> {
    let path = cache_path(data_path, side);
    info!("looking for file: {}", path.display());

    if path.is_file() {
        info!("loading previous training cache");
        let images = load(&path, side)?;
        return ImageDataset::new(images);
    }

    let start = Instant::now();
    info!("loading training images");
    let images = build_images(&data_path.join(SOURCE_DIR), side)?;

    info!("saving training image cache");
    save(&path, &images)?;
    info!("image preprocess time: {}", hms_string(start.elapsed()));

    ImageDataset::new(images)
}

/// Reads every image of `dir`, in file name order, resized to `side × side` RGB and scaled
/// to `[-1, 1]`.
pub fn build_images(dir: &Path, side: usize) -> Result<Array4<f32>> {
    let mut paths = fs::read_dir(dir)
        .map_err(GanErr::io(dir))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(GanErr::io(dir))?;

    paths.retain(|path| path.is_file());
    paths.sort();

    if paths.is_empty() {
        return Err(GanErr::EmptyDataset {
            path: dir.to_path_buf(),
        });
    }

    let pixels = paths
        .par_iter()
        .map(|path| read_resized(path, side))
        .collect::<Result<Vec<_>>>()?;

    let n = pixels.len();
    let raw: Vec<f32> = pixels
        .into_iter()
        .flatten()
        .map(|v| v as f32 / 127.5 - 1.)
        .collect();

    Ok(Array4::from_shape_vec((n, side, side, CHANNELS), raw)?)
}

fn read_resized(path: &Path, side: usize) -> Result<Vec<u8>> {
    let image = image::open(path).map_err(|source| GanErr::Image {
        path: path.to_path_buf(),
        source,
    })?;

    let side = side as u32;
    debug!("resizing {}", path.display());
    Ok(image
        .resize_exact(side, side, FilterType::Lanczos3)
        .to_rgb8()
        .into_raw())
}

fn save(path: &Path, images: &Array4<f32>) -> Result<()> {
    let values: Vec<f32> = images.iter().copied().collect();
    let view = TensorView::new(
        Dtype::F32,
        images.shape().to_vec(),
        bytemuck::cast_slice(&values),
    )?;

    safetensors::serialize_to_file([(TENSOR_NAME, view)], &None, path)?;
    Ok(())
}

fn load(path: &Path, side: usize) -> Result<Array4<f32>> {
    let bytes = fs::read(path).map_err(GanErr::io(path))?;
    let tensors = SafeTensors::deserialize(&bytes)?;
    let tensor = tensors
        .tensor(TENSOR_NAME)
        .map_err(|_| GanErr::MissingTensor {
            path: path.to_path_buf(),
            name: TENSOR_NAME.into(),
        })?;

    let shape = tensor.shape();
    let fits = tensor.dtype() == Dtype::F32
        && shape.len() == 4
        && shape[1..] == [side, side, CHANNELS];

    if !fits {
        return Err(GanErr::CacheShapeMismatch {
            path: path.to_path_buf(),
            found: format!("{:?} {shape:?}", tensor.dtype()),
            expected: format!("F32 [_, {side}, {side}, {CHANNELS}]"),
        });
    }

    if shape[0] == 0 {
        return Err(GanErr::EmptyDataset {
            path: path.to_path_buf(),
        });
    }

    let values = tensor
        .data()
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect();

    Ok(Array4::from_shape_vec(
        (shape[0], side, side, CHANNELS),
        values,
    )?)
}
