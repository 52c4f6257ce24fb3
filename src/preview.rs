use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{Rgb, RgbImage};
use ndarray::ArrayView4;

use crate::{GanErr, Result};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// The layout of a preview contact sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub rows: usize,
    pub cols: usize,
    pub margin: usize,
}

impl Grid {
    /// The `(width, height)` of a sheet of `side` pixel images, `None` if it doesn't fit in
    /// the `u32` dimensions of an image.
    pub fn canvas_size(&self, side: usize) -> Option<(u32, u32)> {
        let extent = |cells: usize| {
            let cell = side.checked_add(self.margin)?;
            let total = cells.checked_mul(cell)?.checked_add(self.margin)?;
            u32::try_from(total).ok()
        };

        Some((extent(self.cols)?, extent(self.rows)?))
    }
}

/// Maps a value in `[-1, 1]` to a pixel intensity.
fn to_u8(v: f32) -> u8 {
    ((0.5 * v + 0.5) * 255.).clamp(0., 255.) as u8
}

/// Tiles the first `rows × cols` images of a batch row by row over a white canvas.
///
/// # Arguments
/// * `images` - A `(count, side, side, 3)` batch with values in `[-1, 1]`.
/// * `grid` - The layout of the sheet.
///
/// # Returns
/// The contact sheet or an error if there aren't enough RGB images.
pub fn tile(images: ArrayView4<f32>, grid: Grid) -> Result<RgbImage> {
    let (count, side, width, channels) = images.dim();
    let needed = grid.rows * grid.cols;

    if count < needed || side != width || channels != 3 {
        return Err(GanErr::ShapeMismatch {
            what: "preview images",
            found: images.shape().to_vec(),
            expected: format!("at least {needed} square RGB images"),
        });
    }

    let (canvas_w, canvas_h) = grid.canvas_size(side).ok_or_else(|| {
        GanErr::InvalidConfig(format!("a {grid:?} sheet of {side} px images is too large"))
    })?;
    let mut canvas = RgbImage::from_pixel(canvas_w, canvas_h, BACKGROUND);
    let stride = side + grid.margin;

    for (i, image) in images.outer_iter().take(needed).enumerate() {
        let top = grid.margin + (i / grid.cols) * stride;
        let left = grid.margin + (i % grid.cols) * stride;

        for ((y, x, c), &v) in image.indexed_iter() {
            canvas.get_pixel_mut((left + x) as u32, (top + y) as u32)[c] = to_u8(v);
        }
    }

    Ok(canvas)
}

/// The path of the preview with the given index.
pub fn preview_path(output_dir: &Path, index: usize) -> PathBuf {
    output_dir.join(format!("train-{index}.png"))
}

/// Tiles `images` and writes the sheet as `train-<index>.png` under `output_dir`, creating
/// the directory if needed.
pub fn save_preview(
    images: ArrayView4<f32>,
    grid: Grid,
    output_dir: &Path,
    index: usize,
) -> Result<PathBuf> {
    let canvas = tile(images, grid)?;

    fs::create_dir_all(output_dir).map_err(GanErr::io(output_dir))?;
    let path = preview_path(output_dir, index);
    canvas.save(&path).map_err(|source| GanErr::Image {
        path: path.clone(),
        source,
    })?;

    Ok(path)
}
