use ndarray::{linalg, prelude::*};
use rayon::prelude::*;

use crate::{MlErr, Result};

/// Two dimensional convolution over channels-last batches with "same" padding.
///
/// Each sample is lowered to a `(out_h * out_w, kernel * kernel * in_channels)` patch matrix
/// so the convolution, and both products of its backward pass, become matrix products. The
/// batch is processed sample by sample on the rayon pool, which bounds the memory used by
/// the patch matrices to one per thread.
///
/// Parameter layout: the `(kernel * kernel * in_channels, out_channels)` kernel matrix, rows
/// ordered by kernel row, kernel column and input channel, followed by the `out_channels`
/// biases.
#[derive(Clone, Debug)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    size: usize,

    // Forward metadata
    x: Option<Array4<f32>>,
}

/// Precomputed sizes for lowering one sample.
#[derive(Clone, Copy, Debug)]
struct Geometry {
    h: usize,
    w: usize,
    channels: usize,
    out_h: usize,
    out_w: usize,
    kernel: usize,
    stride: usize,
    pad_top: usize,
    pad_left: usize,
}

impl Geometry {
    fn rows(&self) -> usize {
        self.out_h * self.out_w
    }

    fn cols(&self) -> usize {
        self.kernel * self.kernel * self.channels
    }

    /// Calls `f(patch_offset, input_offset)` for every in-bounds kernel tap, offsets point
    /// to the first channel of the tap.
    fn for_each_tap(&self, mut f: impl FnMut(usize, usize)) {
        let (k, c) = (self.kernel, self.channels);

        for oy in 0..self.out_h {
            for ox in 0..self.out_w {
                let row = (oy * self.out_w + ox) * self.cols();

                for ky in 0..k {
                    let Some(iy) = (oy * self.stride + ky).checked_sub(self.pad_top) else {
                        continue;
                    };
                    if iy >= self.h {
                        continue;
                    }

                    for kx in 0..k {
                        let Some(ix) = (ox * self.stride + kx).checked_sub(self.pad_left) else {
                            continue;
                        };
                        if ix >= self.w {
                            continue;
                        }

                        f(row + (ky * k + kx) * c, (iy * self.w + ix) * c);
                    }
                }
            }
        }
    }

    fn im2col(&self, x: &[f32]) -> Vec<f32> {
        let c = self.channels;
        let mut patches = vec![0.; self.rows() * self.cols()];

        self.for_each_tap(|dst, src| {
            patches[dst..dst + c].copy_from_slice(&x[src..src + c]);
        });

        patches
    }

    fn col2im(&self, patches: &[f32], dx: &mut [f32]) {
        let c = self.channels;

        self.for_each_tap(|src, dst| {
            dx[dst..dst + c]
                .iter_mut()
                .zip(&patches[src..src + c])
                .for_each(|(dx, p)| *dx += p);
        });
    }
}

impl Conv2d {
    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `in_channels` - The amount of channels of the input.
    /// * `out_channels` - The amount of filters, that is, the channels of the output.
    /// * `kernel` - The side of the square kernel.
    /// * `stride` - The step between two consecutive kernel applications.
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, stride: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride,
            size: (kernel * kernel * in_channels + 1) * out_channels,
            x: None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel(&self) -> usize {
        self.kernel
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Returns the spatial side of the output for an input side under "same" padding.
    pub fn out_side(&self, side: usize) -> usize {
        side.div_ceil(self.stride)
    }

    fn geometry(&self, h: usize, w: usize) -> Geometry {
        let (out_h, out_w) = (self.out_side(h), self.out_side(w));
        let pad = |input: usize, output: usize| {
            ((output.saturating_sub(1)) * self.stride + self.kernel).saturating_sub(input) / 2
        };

        Geometry {
            h,
            w,
            channels: self.in_channels,
            out_h,
            out_w,
            kernel: self.kernel,
            stride: self.stride,
            pad_top: pad(h, out_h),
            pad_left: pad(w, out_w),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = standard_4d(x)?;
        let (n, h, w, c) = x.dim();
        if c != self.in_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv2d input channels",
                got: c,
                expected: self.in_channels,
            });
        }

        let geo = self.geometry(h, w);
        let (kernel, bias) = self.view_params(params)?;
        let (sample_in, sample_out) = (h * w * c, geo.rows() * self.out_channels);

        let xs = x.as_slice().ok_or(MlErr::InvalidLayer(
            "conv2d input is not contiguous".into(),
        ))?;
        let mut out = vec![0.; n * sample_out];

        out.par_chunks_mut(sample_out)
            .zip(xs.par_chunks(sample_in))
            .try_for_each(|(out_i, x_i)| -> Result<()> {
                let patches = geo.im2col(x_i);
                let patches = ArrayView2::from_shape((geo.rows(), geo.cols()), &patches[..])?;
                let mut out_i = ArrayViewMut2::from_shape((geo.rows(), self.out_channels), out_i)?;

                linalg::general_mat_mul(1.0, &patches, &kernel, 0.0, &mut out_i);
                out_i += &bias;
                Ok(())
            })?;

        let y = Array4::from_shape_vec((n, geo.out_h, geo.out_w, self.out_channels), out)?;
        self.x = Some(x);
        Ok(y.into_dyn())
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: Option<&mut [f32]>,
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        let x = self
            .x
            .as_ref()
            .ok_or(MlErr::MissingForwardPass { layer: "conv2d" })?;
        let (n, h, w, c) = x.dim();
        let geo = self.geometry(h, w);

        let d = standard_4d(d)?;
        let expected = [n, geo.out_h, geo.out_w, self.out_channels];
        if d.shape() != expected {
            return Err(MlErr::ShapeMismatch {
                what: "conv2d delta",
                got: d.shape().to_vec(),
                expected: expected.to_vec(),
            });
        }

        let not_contiguous = || MlErr::InvalidLayer("conv2d buffers are not contiguous".into());
        let xs = x.as_slice().ok_or_else(not_contiguous)?;
        let ds = d.as_slice().ok_or_else(not_contiguous)?;

        let (kernel, _) = self.view_params(params)?;
        let (sample_in, sample_out) = (h * w * c, geo.rows() * self.out_channels);
        let (rows, cols, out_c) = (geo.rows(), geo.cols(), self.out_channels);
        let mut dx = vec![0.; n * sample_in];

        // Propagates the delta of one sample back to its input.
        let input_delta = |d_i: ArrayView2<f32>, dx_i: &mut [f32]| -> Result<()> {
            let mut patches = vec![0.; rows * cols];
            let mut dpatches = ArrayViewMut2::from_shape((rows, cols), &mut patches[..])?;
            linalg::general_mat_mul(1.0, &d_i, &kernel.t(), 0.0, &mut dpatches);
            geo.col2im(&patches, dx_i);
            Ok(())
        };

        match grad {
            Some(grad) => {
                let dkernel = dx
                    .par_chunks_mut(sample_in)
                    .zip(xs.par_chunks(sample_in))
                    .zip(ds.par_chunks(sample_out))
                    .try_fold(
                        || Array2::<f32>::zeros((cols, out_c)),
                        |mut acc, ((dx_i, x_i), d_i)| -> Result<Array2<f32>> {
                            let d_i = ArrayView2::from_shape((rows, out_c), d_i)?;
                            let patches = geo.im2col(x_i);
                            let patches = ArrayView2::from_shape((rows, cols), &patches[..])?;

                            linalg::general_mat_mul(1.0, &patches.t(), &d_i, 1.0, &mut acc);
                            input_delta(d_i, dx_i)?;
                            Ok(acc)
                        },
                    )
                    .try_reduce(|| Array2::zeros((cols, out_c)), |a, b| Ok(a + b))?;

                let (mut dw, mut db) = self.view_grad(grad)?;
                dw.assign(&dkernel);
                db.assign(&d.to_shape((n * rows, out_c))?.sum_axis(Axis(0)));
            }
            None => {
                dx.par_chunks_mut(sample_in)
                    .zip(ds.par_chunks(sample_out))
                    .try_for_each(|(dx_i, d_i)| -> Result<()> {
                        let d_i = ArrayView2::from_shape((rows, out_c), d_i)?;
                        input_delta(d_i, dx_i)
                    })?;
            }
        }

        Ok(Array4::from_shape_vec((n, h, w, c), dx)?.into_dyn())
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let k_size = self.size - self.out_channels;
        let (dk_raw, db_raw) = grad.split_at_mut(k_size);
        let dk = ArrayViewMut2::from_shape((k_size / self.out_channels, self.out_channels), dk_raw)?;
        let db = ArrayViewMut1::from_shape(self.out_channels, db_raw)?;
        Ok((dk, db))
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let k_size = self.size - self.out_channels;
        let (k_raw, b_raw) = params.split_at(k_size);
        let k = ArrayView2::from_shape((k_size / self.out_channels, self.out_channels), k_raw)?;
        let b = ArrayView1::from_shape(self.out_channels, b_raw)?;
        Ok((k, b))
    }
}

/// Converts `x` into an owned standard layout 4d array.
fn standard_4d(x: ArrayD<f32>) -> Result<Array4<f32>> {
    let x = x.into_dimensionality::<Ix4>()?;
    if x.is_standard_layout() {
        return Ok(x);
    }

    Ok(x.as_standard_layout().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_padding_keeps_size_with_unit_stride() {
        let mut conv = Conv2d::new(1, 1, 3, 1);
        let mut params = vec![0.; conv.size()];
        // Identity kernel: only the center tap is set.
        params[4] = 1.;

        let x = Array4::from_shape_fn((1, 4, 4, 1), |(_, y, x, _)| (y * 4 + x) as f32);
        let y = conv.forward(&params, x.clone().into_dyn()).unwrap();

        assert_eq!(y, x.into_dyn());
    }

    #[test]
    fn stride_two_halves_rounding_up() {
        let mut conv = Conv2d::new(3, 2, 3, 2);
        let params = vec![0.1; conv.size()];
        let x = Array4::<f32>::ones((2, 5, 5, 3)).into_dyn();

        let y = conv.forward(&params, x).unwrap();
        assert_eq!(y.shape(), &[2, 3, 3, 2]);
    }

    #[test]
    fn box_kernel_sums_the_neighbourhood() {
        let mut conv = Conv2d::new(1, 1, 3, 1);
        let mut params = vec![1.; conv.size()];
        *params.last_mut().unwrap() = 0.;

        let x = Array4::<f32>::ones((1, 3, 3, 1)).into_dyn();
        let y = conv.forward(&params, x).unwrap();

        // Corners see 4 taps, edges 6 and the center 9.
        let expected = array![[4., 6., 4.], [6., 9., 6.], [4., 6., 4.]]
            .into_shape_with_order((1, 3, 3, 1))
            .unwrap()
            .into_dyn();
        assert_eq!(y, expected);
    }

    #[test]
    fn wrong_channel_count_fails() {
        let mut conv = Conv2d::new(3, 1, 3, 1);
        let x = Array4::<f32>::ones((1, 3, 3, 1)).into_dyn();
        assert!(conv.forward(&vec![0.; conv.size()], x).is_err());
    }
}
