//! FFT phase correlation, used as an optional coarse translation seed
//! before gradient descent.

use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};

/// Estimate the pixel shift of `moving` relative to `fixed`. Returns the
/// translation (in fixed-grid pixels) that maps fixed coordinates onto
/// the matching moving content, or None for degenerate inputs.
pub fn phase_correlate(fixed: &Array2<f64>, moving: &Array2<f64>) -> Option<(f64, f64)> {
    if fixed.is_empty() || moving.is_empty() {
        return None;
    }
    let height = fixed.nrows().max(moving.nrows());
    let width = fixed.ncols().max(moving.ncols());

    let fixed_fft = fft_2d(&to_complex(fixed, height, width), false);
    let moving_fft = fft_2d(&to_complex(moving, height, width), false);
    // moving * conj(fixed) puts the peak at the shift that maps fixed
    // coordinates onto the moving content
    let cross_power = cross_power_spectrum(&moving_fft, &fixed_fft);
    let correlation = fft_2d(&cross_power, true);

    let (peak_x, peak_y) = correlation_peak(&correlation);

    // unwrap the cyclic peak position into a signed shift
    let tx = if peak_x > width / 2 {
        peak_x as f64 - width as f64
    } else {
        peak_x as f64
    };
    let ty = if peak_y > height / 2 {
        peak_y as f64 - height as f64
    } else {
        peak_y as f64
    };
    Some((tx, ty))
}

fn to_complex(img: &Array2<f64>, height: usize, width: usize) -> Array2<Complex<f64>> {
    // zero-mean so the DC bin carries no weight and cannot drown the
    // true peak for smooth, non-periodic content
    let mean = img.sum() / img.len() as f64;
    let mut out = Array2::zeros((height, width));
    for ((y, x), &v) in img.indexed_iter() {
        out[[y, x]] = Complex::new(v - mean, 0.0);
    }
    out
}

fn fft_2d(input: &Array2<Complex<f64>>, inverse: bool) -> Array2<Complex<f64>> {
    let (height, width) = input.dim();
    let mut result = input.clone();
    let mut planner = FftPlanner::new();

    let row_fft = if inverse {
        planner.plan_fft_inverse(width)
    } else {
        planner.plan_fft_forward(width)
    };
    for mut row in result.rows_mut() {
        let mut data: Vec<Complex<f64>> = row.to_vec();
        row_fft.process(&mut data);
        for (i, v) in data.into_iter().enumerate() {
            row[i] = if inverse { v / width as f64 } else { v };
        }
    }

    let col_fft = if inverse {
        planner.plan_fft_inverse(height)
    } else {
        planner.plan_fft_forward(height)
    };
    for mut col in result.columns_mut() {
        let mut data: Vec<Complex<f64>> = col.to_vec();
        col_fft.process(&mut data);
        for (i, v) in data.into_iter().enumerate() {
            col[i] = if inverse { v / height as f64 } else { v };
        }
    }

    result
}

fn cross_power_spectrum(
    lhs: &Array2<Complex<f64>>,
    rhs: &Array2<Complex<f64>>,
) -> Array2<Complex<f64>> {
    let mut out = Array2::zeros(lhs.dim());
    for (o, (f, m)) in out.iter_mut().zip(lhs.iter().zip(rhs.iter())) {
        let product = f * m.conj();
        // soft normalization: near-empty bins fade out instead of being
        // whitened to full weight or zeroed outright
        *o = product / (product.norm() + 1e-12);
    }
    out
}

fn correlation_peak(correlation: &Array2<Complex<f64>>) -> (usize, usize) {
    let mut max_val = f64::NEG_INFINITY;
    let mut peak = (0, 0);
    for ((y, x), v) in correlation.indexed_iter() {
        let magnitude = v.norm();
        if magnitude > max_val {
            max_val = magnitude;
            peak = (x, y);
        }
    }
    peak
}
